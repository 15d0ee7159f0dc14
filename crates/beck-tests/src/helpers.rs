//! Test fixtures: deterministic keys, instant-difficulty chains, and a
//! mine-and-submit shortcut that plays the miner's role in-process.

use std::sync::atomic::AtomicBool;

use beck_core::address::Address;
use beck_core::amount::Amount;
use beck_core::constants::COIN;
use beck_core::crypto::KeyPair;
use beck_core::pow;
use beck_core::types::Block;
use beck_node_lib::chain::Chain;
use beck_node_lib::coordinator::{MiningCoordinator, SubmitOutcome};

/// Difficulty used throughout the integration tests so mining is instant.
pub const TEST_DIFFICULTY: u32 = 1;

/// Deterministic keypair from a one-byte seed (seed must be nonzero).
pub fn keypair(seed: u8) -> KeyPair {
    let mut secret = [0u8; 32];
    secret[31] = seed;
    KeyPair::from_secret_hex(&hex::encode(secret)).expect("nonzero seed is a valid key")
}

/// A literal address `0x00..seed`.
pub fn addr(seed: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = seed;
    Address::from_bytes(bytes)
}

/// Whole BECK as an [`Amount`].
pub fn beck(n: i64) -> Amount {
    Amount::from_minor(n * COIN)
}

/// A coordinator over a fresh chain rewarding `genesis` in a temp dir.
pub fn temp_coordinator(genesis: Address) -> (MiningCoordinator, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let chain = Chain::create(dir.path().join("chaindata"), genesis, TEST_DIFFICULTY)
        .expect("create chain");
    (MiningCoordinator::new(chain), dir)
}

/// Fetch a template for `miner`, mine it, and return the mined block.
pub fn mine_block(coordinator: &MiningCoordinator, miner: Address) -> Block {
    let template = coordinator.block_template(miner).expect("block template");
    let mut block = template.block;
    assert!(pow::mine(&mut block, &AtomicBool::new(false)));
    block
}

/// Mine a template for `miner` and submit the solution.
pub fn mine_and_submit(coordinator: &MiningCoordinator, miner: Address) -> SubmitOutcome {
    let block = mine_block(coordinator, miner);
    let (hash, nonce) = (block.hash, block.nonce);
    coordinator.submit_block(block, hash, nonce)
}
