//! Hashcash-style proof of work.
//!
//! A block's header hash, read as a 256-bit big-endian integer, must be
//! strictly below `2^(256 - difficulty)`. Difficulty is clamped to
//! `[MIN_DIFFICULTY, MAX_DIFFICULTY]`, so the comparison only ever
//! involves the leading 8 bytes of the hash.
//!
//! The nonce search is cooperative: it samples a cancellation flag every
//! [`CANCEL_CHECK_INTERVAL`] nonces so miners can abandon stale templates
//! within a bounded amount of hashing.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::constants::{CANCEL_CHECK_INTERVAL, MAX_DIFFICULTY, MIN_DIFFICULTY};
use crate::types::{Block, Hash256};

/// Outcome of a nonce search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A nonce satisfying the target was found.
    Found { nonce: i64, hash: Hash256 },
    /// The cancellation flag was raised before a solution appeared.
    Cancelled,
    /// The nonce space ran out (practically unreachable).
    Exhausted,
}

/// The 64-bit rendering of `2^(256 - difficulty)`: a hash meets the target
/// iff its leading 8 bytes, read big-endian, are strictly below this.
fn compact_target(difficulty: u32) -> u64 {
    let d = difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
    1u64 << (64 - d)
}

/// Whether `hash < 2^(256 - difficulty)`.
pub fn meets_target(hash: &Hash256, difficulty: u32) -> bool {
    let mut leading = [0u8; 8];
    leading.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(leading) < compact_target(difficulty)
}

/// Validate a mined block: the recorded hash must match the recomputed
/// header hash for the recorded nonce and meet the block's difficulty.
pub fn validate(block: &Block) -> bool {
    let hash = block.header_hash(block.nonce);
    hash == block.hash && meets_target(&hash, block.difficulty)
}

/// Search the nonce space for a header hash below the target.
///
/// Iterates from nonce 0 upward; checks `cancel` every
/// [`CANCEL_CHECK_INTERVAL`] nonces.
pub fn search(block: &Block, cancel: &AtomicBool) -> SearchOutcome {
    let tx_digest = block.transactions_digest();
    debug!(
        height = block.height,
        difficulty = block.difficulty,
        "starting nonce search"
    );

    let mut nonce: i64 = 0;
    while nonce < i64::MAX {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            debug!(height = block.height, nonce, "nonce search cancelled");
            return SearchOutcome::Cancelled;
        }
        let hash = block.header_hash_with(&tx_digest, nonce);
        if meets_target(&hash, block.difficulty) {
            debug!(height = block.height, nonce, %hash, "found valid proof of work");
            return SearchOutcome::Found { nonce, hash };
        }
        nonce += 1;
    }
    SearchOutcome::Exhausted
}

/// Mine `block` in place, filling in `nonce` and `hash`. Returns `false`
/// if the search was cancelled or exhausted.
pub fn mine(block: &mut Block, cancel: &AtomicBool) -> bool {
    match search(block, cancel) {
        SearchOutcome::Found { nonce, hash } => {
            block.nonce = nonce;
            block.hash = hash;
            true
        }
        SearchOutcome::Cancelled | SearchOutcome::Exhausted => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::amount::Amount;
    use crate::types::Transaction;

    fn unmined_block(difficulty: u32) -> Block {
        let coinbase =
            Transaction::coinbase(Address::from_bytes([1; 20]), b"pow test", Amount::ZERO)
                .unwrap();
        Block::new(vec![coinbase], Hash256::ZERO, 0, difficulty, 1_700_000_000)
    }

    // --- Target ---

    #[test]
    fn target_difficulty_one_accepts_half() {
        // Difficulty 1 requires the top bit to be zero.
        assert!(meets_target(&Hash256([0x7F; 32]), 1));
        assert!(!meets_target(&Hash256([0x80; 32]), 1));
    }

    #[test]
    fn target_difficulty_eight_requires_zero_byte() {
        let mut hash = [0u8; 32];
        hash[1] = 0xFF;
        assert!(meets_target(&Hash256(hash), 8));
        hash[0] = 0x01;
        assert!(!meets_target(&Hash256(hash), 8));
    }

    #[test]
    fn target_difficulty_sixty_four() {
        // Only hashes whose leading 8 bytes are all zero pass.
        let mut hash = [0xFF; 32];
        hash[..8].fill(0);
        assert!(meets_target(&Hash256(hash), 64));
        hash[7] = 1;
        assert!(!meets_target(&Hash256(hash), 64));
    }

    #[test]
    fn zero_hash_always_meets_target() {
        for d in [1, 24, 64] {
            assert!(meets_target(&Hash256::ZERO, d));
        }
    }

    #[test]
    fn target_strictly_monotone_in_difficulty() {
        // Anything that meets difficulty d also meets d - 1.
        let hash = Hash256([0x00, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
                            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(meets_target(&hash, 8));
        assert!(meets_target(&hash, 7));
        assert!(!meets_target(&hash, 9));
    }

    // --- Search / validate ---

    #[test]
    fn search_finds_solution_at_low_difficulty() {
        let block = unmined_block(1);
        match search(&block, &AtomicBool::new(false)) {
            SearchOutcome::Found { nonce, hash } => {
                assert!(meets_target(&hash, 1));
                assert_eq!(block.header_hash(nonce), hash);
            }
            other => panic!("expected a solution, got {other:?}"),
        }
    }

    #[test]
    fn mine_fills_block_and_validates() {
        let mut block = unmined_block(4);
        assert!(mine(&mut block, &AtomicBool::new(false)));
        assert!(validate(&block));
    }

    #[test]
    fn validate_rejects_wrong_nonce() {
        let mut block = unmined_block(4);
        assert!(mine(&mut block, &AtomicBool::new(false)));
        block.nonce += 1;
        assert!(!validate(&block));
    }

    #[test]
    fn validate_rejects_mismatched_hash() {
        let mut block = unmined_block(1);
        assert!(mine(&mut block, &AtomicBool::new(false)));
        block.hash = Hash256([0xEE; 32]);
        assert!(!validate(&block));
    }

    #[test]
    fn validate_rejects_hash_above_target() {
        // Find a nonce whose hash fails difficulty 1 and claim it anyway.
        let mut block = unmined_block(1);
        let mut nonce = 0;
        loop {
            let hash = block.header_hash(nonce);
            if !meets_target(&hash, 1) {
                block.nonce = nonce;
                block.hash = hash;
                break;
            }
            nonce += 1;
        }
        assert!(!validate(&block));
    }

    #[test]
    fn search_cancelled_immediately() {
        // With the flag pre-set, the first interval check fires at nonce 0.
        let block = unmined_block(64);
        let cancel = AtomicBool::new(true);
        assert_eq!(search(&block, &cancel), SearchOutcome::Cancelled);
    }

    #[test]
    fn mine_returns_false_when_cancelled() {
        let mut block = unmined_block(64);
        assert!(!mine(&mut block, &AtomicBool::new(true)));
        assert!(block.hash.is_zero());
    }
}
