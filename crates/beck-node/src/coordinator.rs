//! Mining coordination: block templates, solution adjudication, and the
//! serialization point between user submissions, miners, and storage.
//!
//! One mutex guards the chain and the mempool together. Template
//! production, submission, status, and transaction ingress all take it, so
//! concurrent miners observe a total order: whichever submission commits
//! first wins, and the loser gets a linkage or height error and must fetch
//! a fresh template. Proof-of-work search never happens here.

use parking_lot::Mutex;
use tracing::{info, warn};

use beck_core::address::Address;
use beck_core::amount::Amount;
use beck_core::constants::{
    BLOCK_HEADER_RESERVE, COINBASE_DATA, COINBASE_RESERVE, MAX_BLOCK_SIZE,
};
use beck_core::error::{BeckError, TransactionError};
use beck_core::mempool::Mempool;
use beck_core::pow;
use beck_core::types::{Block, Hash256, Transaction};

use crate::chain::Chain;

/// Snapshot of the chain tip, as reported to miners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainStatus {
    pub height: u64,
    pub latest_hash: Hash256,
    pub difficulty: u32,
}

/// An unmined block plus the difficulty it must be mined at.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
    pub difficulty: u32,
}

/// Outcome of a block submission. Rejections carry a human-readable
/// message and leave the chain untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { block_hash: Hash256 },
    Rejected { error_message: String },
}

/// Details for a transaction lookup spanning chain and mempool.
#[derive(Clone, Debug)]
pub enum TxDetails {
    Confirmed {
        tx: Transaction,
        block_height: u64,
        timestamp: i64,
    },
    Pending {
        tx: Transaction,
    },
}

struct CoordinatorState {
    chain: Chain,
    mempool: Mempool,
}

/// The node's single serialization point for chain mutations.
pub struct MiningCoordinator {
    state: Mutex<CoordinatorState>,
}

impl MiningCoordinator {
    pub fn new(chain: Chain) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                chain,
                mempool: Mempool::new(),
            }),
        }
    }

    /// Current tip height, hash, and difficulty.
    pub fn status(&self) -> ChainStatus {
        let state = self.state.lock();
        ChainStatus {
            height: state.chain.height(),
            latest_hash: state.chain.tip_hash(),
            difficulty: state.chain.difficulty(),
        }
    }

    /// Build a block template for `miner_address`.
    ///
    /// Candidates come from a mempool snapshot, ordered by fee per
    /// serialized byte (descending, ties broken by ascending id) and
    /// greedily packed under the block size budget. The coinbase paying
    /// the miner the reward plus collected fees goes last. Retargeting is
    /// applied here when the next height is an adjustment boundary.
    pub fn block_template(&self, miner_address: Address) -> Result<BlockTemplate, BeckError> {
        let mut state = self.state.lock();
        let next_height = state.chain.height() + 1;
        let difficulty = state.chain.retarget_if_due(next_height)?;

        let mut weighted = Vec::new();
        for tx in state.mempool.snapshot() {
            // An adversarial submission shaped like a coinbase would break
            // the one-coinbase invariant at commit; drop it here.
            if tx.is_coinbase() {
                continue;
            }
            let size = tx.encoded_size().map_err(BeckError::from)?;
            weighted.push((tx, size));
        }
        weighted.sort_by(|(a, size_a), (b, size_b)| {
            // Compare fee/size as cross products to stay in integers.
            let lhs = a.fee.to_minor() as i128 * *size_b as i128;
            let rhs = b.fee.to_minor() as i128 * *size_a as i128;
            rhs.cmp(&lhs).then_with(|| a.id.cmp(&b.id))
        });

        let budget = MAX_BLOCK_SIZE - BLOCK_HEADER_RESERVE - COINBASE_RESERVE;
        let mut selected = Vec::new();
        let mut used = 0usize;
        let mut total_fees = Amount::ZERO;
        for (tx, size) in weighted {
            if used + size > budget {
                continue;
            }
            used += size;
            total_fees = total_fees
                .checked_add(tx.fee)
                .ok_or(TransactionError::ValueOverflow)
                .map_err(BeckError::from)?;
            selected.push(tx);
        }

        let data = format!("{COINBASE_DATA} {next_height}");
        let coinbase = Transaction::coinbase(miner_address, data.as_bytes(), total_fees)
            .map_err(BeckError::from)?;
        selected.push(coinbase);

        let block = state.chain.prepare_block(selected);
        info!(
            height = block.height,
            txs = block.transactions.len() - 1,
            %total_fees,
            difficulty,
            "prepared block template"
        );
        Ok(BlockTemplate { block, difficulty })
    }

    /// Adjudicate a mined block: fill in the claimed nonce and hash,
    /// validate the proof of work against the current difficulty, and
    /// commit. Committed transactions are evicted from the mempool.
    pub fn submit_block(
        &self,
        mut block: Block,
        claimed_hash: Hash256,
        nonce: i64,
    ) -> SubmitOutcome {
        let mut state = self.state.lock();
        block.nonce = nonce;
        block.hash = claimed_hash;

        let current = state.chain.difficulty();
        if block.difficulty != current {
            warn!(
                height = block.height,
                got = block.difficulty,
                current,
                "rejected submission: stale difficulty"
            );
            return SubmitOutcome::Rejected {
                error_message: format!(
                    "block difficulty {} does not match current difficulty {current}",
                    block.difficulty
                ),
            };
        }
        if !pow::validate(&block) {
            warn!(height = block.height, "rejected submission: invalid proof of work");
            return SubmitOutcome::Rejected {
                error_message: "invalid proof of work".into(),
            };
        }

        match state.chain.append_block(&block) {
            Ok(()) => {
                state.mempool.evict(&block.transactions);
                info!(height = block.height, hash = %block.hash, "accepted block");
                SubmitOutcome::Accepted {
                    block_hash: block.hash,
                }
            }
            Err(e) => {
                warn!(height = block.height, error = %e, "rejected submission");
                SubmitOutcome::Rejected {
                    error_message: e.to_string(),
                }
            }
        }
    }

    /// Snapshot of the pending transactions.
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().mempool.snapshot()
    }

    /// Build a payment against the current chain state and admit it to
    /// the mempool. Verification against the UTXO set happens at block
    /// commit; this only authenticates the key and selects inputs.
    pub fn submit_transaction(
        &self,
        secret_hex: &str,
        from: Address,
        to: Address,
        amount: Amount,
        fee: Amount,
    ) -> Result<Hash256, BeckError> {
        let mut state = self.state.lock();
        let tx = state.chain.build_transaction(secret_hex, from, to, amount, fee)?;
        let id = tx.id;
        state.mempool.add(tx);
        info!(%id, %from, %to, %amount, %fee, "accepted transaction into mempool");
        Ok(id)
    }

    /// Run a read-only query against a consistent chain snapshot.
    ///
    /// Holding the coordinator lock for the duration of the closure is
    /// how readers observe a stable tip.
    pub fn read<R>(&self, f: impl FnOnce(&Chain) -> R) -> R {
        let state = self.state.lock();
        f(&state.chain)
    }

    /// Look up a transaction across the chain and the mempool.
    pub fn transaction_details(&self, id: &Hash256) -> Result<Option<TxDetails>, BeckError> {
        let state = self.state.lock();
        if let Some((tx, block_height, timestamp)) = state.chain.find_tx_entry(id)? {
            return Ok(Some(TxDetails::Confirmed {
                tx,
                block_height,
                timestamp,
            }));
        }
        Ok(state
            .mempool
            .get(id)
            .cloned()
            .map(|tx| TxDetails::Pending { tx }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beck_core::constants::{COIN, MINING_REWARD};
    use beck_core::crypto::KeyPair;
    use std::sync::atomic::AtomicBool;

    const TEST_DIFFICULTY: u32 = 1;

    fn keypair(seed: u8) -> KeyPair {
        let mut secret = [0u8; 32];
        secret[31] = seed;
        KeyPair::from_secret_hex(&hex::encode(secret)).unwrap()
    }

    fn addr(seed: u8) -> Address {
        Address::from_bytes([seed; 20])
    }

    fn beck(n: i64) -> Amount {
        Amount::from_minor(n * COIN)
    }

    fn temp_coordinator(genesis: Address) -> (MiningCoordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let chain = Chain::create(dir.path().join("chaindata"), genesis, TEST_DIFFICULTY)
            .unwrap();
        (MiningCoordinator::new(chain), dir)
    }

    fn mine_template(template: &BlockTemplate) -> Block {
        let mut block = template.block.clone();
        assert!(pow::mine(&mut block, &AtomicBool::new(false)));
        block
    }

    // ------------------------------------------------------------------
    // Status and templates
    // ------------------------------------------------------------------

    #[test]
    fn status_reports_tip() {
        let (coordinator, _dir) = temp_coordinator(addr(1));
        let status = coordinator.status();
        assert_eq!(status.height, 0);
        assert_eq!(status.difficulty, TEST_DIFFICULTY);
        assert!(!status.latest_hash.is_zero());
    }

    #[test]
    fn template_contains_single_trailing_coinbase() {
        let (coordinator, _dir) = temp_coordinator(addr(1));
        let template = coordinator.block_template(addr(9)).unwrap();

        assert_eq!(template.difficulty, TEST_DIFFICULTY);
        assert_eq!(template.block.height, 1);
        assert_eq!(template.block.transactions.len(), 1);
        let coinbase = template.block.transactions.last().unwrap();
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.outputs[0].value, MINING_REWARD);
        assert_eq!(coinbase.outputs[0].address, addr(9));
    }

    #[test]
    fn template_orders_by_fee_rate_and_collects_fees() {
        let sender = keypair(1);
        let (coordinator, _dir) = temp_coordinator(sender.address());
        // Fund two more outputs for the sender so it can make two payments.
        let mined = mine_template(&coordinator.block_template(sender.address()).unwrap());
        assert!(matches!(
            coordinator.submit_block(mined.clone(), mined.hash, mined.nonce),
            SubmitOutcome::Accepted { .. }
        ));

        let low = coordinator
            .submit_transaction(&sender.secret_hex(), sender.address(), addr(2), beck(1), beck(1))
            .unwrap();
        let high = coordinator
            .submit_transaction(&sender.secret_hex(), sender.address(), addr(3), beck(1), beck(5))
            .unwrap();

        let template = coordinator.block_template(addr(9)).unwrap();
        let txs = &template.block.transactions;
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[0].id, high);
        assert_eq!(txs[1].id, low);
        assert!(txs[2].is_coinbase());
        // Coinbase pays the reward plus both fees.
        assert_eq!(
            txs[2].outputs[0].value,
            MINING_REWARD.checked_add(beck(6)).unwrap()
        );
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    #[test]
    fn submit_valid_block_advances_tip() {
        let (coordinator, _dir) = temp_coordinator(addr(1));
        let template = coordinator.block_template(addr(2)).unwrap();
        let mined = mine_template(&template);

        let outcome = coordinator.submit_block(template.block, mined.hash, mined.nonce);
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted { block_hash: mined.hash }
        );
        assert_eq!(coordinator.status().height, 1);
    }

    #[test]
    fn submit_rejects_invalid_pow() {
        let (coordinator, _dir) = temp_coordinator(addr(1));
        let template = coordinator.block_template(addr(2)).unwrap();

        // Hand in a nonce whose hash misses the target.
        let mut nonce = 0;
        let (bad_nonce, bad_hash) = loop {
            let hash = template.block.header_hash(nonce);
            if !pow::meets_target(&hash, template.difficulty) {
                break (nonce, hash);
            }
            nonce += 1;
        };
        let outcome = coordinator.submit_block(template.block, bad_hash, bad_nonce);
        assert_eq!(
            outcome,
            SubmitOutcome::Rejected {
                error_message: "invalid proof of work".into()
            }
        );
        assert_eq!(coordinator.status().height, 0);
    }

    #[test]
    fn stale_submission_rejected_after_first_commit() {
        let (coordinator, _dir) = temp_coordinator(addr(1));
        let first = coordinator.block_template(addr(2)).unwrap();
        let second = coordinator.block_template(addr(3)).unwrap();

        let mined_first = mine_template(&first);
        assert!(matches!(
            coordinator.submit_block(first.block, mined_first.hash, mined_first.nonce),
            SubmitOutcome::Accepted { .. }
        ));

        let mined_second = mine_template(&second);
        let outcome =
            coordinator.submit_block(second.block, mined_second.hash, mined_second.nonce);
        match outcome {
            SubmitOutcome::Rejected { error_message } => {
                assert!(
                    error_message.contains("link") || error_message.contains("height"),
                    "unexpected message: {error_message}"
                );
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        // Tip advanced by exactly one.
        assert_eq!(coordinator.status().height, 1);
    }

    #[test]
    fn committed_transactions_are_evicted() {
        let sender = keypair(1);
        let (coordinator, _dir) = temp_coordinator(sender.address());

        let id = coordinator
            .submit_transaction(&sender.secret_hex(), sender.address(), addr(2), beck(10), beck(1))
            .unwrap();
        assert_eq!(coordinator.pending_transactions().len(), 1);

        let template = coordinator.block_template(addr(3)).unwrap();
        let mined = mine_template(&template);
        assert!(matches!(
            coordinator.submit_block(template.block, mined.hash, mined.nonce),
            SubmitOutcome::Accepted { .. }
        ));

        assert!(coordinator.pending_transactions().is_empty());
        assert!(coordinator
            .read(|chain| chain.find_tx(&id))
            .is_ok());
    }

    #[test]
    fn failed_submission_keeps_mempool() {
        let sender = keypair(1);
        let (coordinator, _dir) = temp_coordinator(sender.address());
        coordinator
            .submit_transaction(&sender.secret_hex(), sender.address(), addr(2), beck(10), beck(1))
            .unwrap();

        let template = coordinator.block_template(addr(3)).unwrap();
        // Submit without mining.
        let outcome =
            coordinator.submit_block(template.block.clone(), Hash256([0xAB; 32]), 0);
        assert!(matches!(outcome, SubmitOutcome::Rejected { .. }));
        assert_eq!(coordinator.pending_transactions().len(), 1);
    }

    // ------------------------------------------------------------------
    // Transaction lookup
    // ------------------------------------------------------------------

    #[test]
    fn transaction_details_pending_then_confirmed() {
        let sender = keypair(1);
        let (coordinator, _dir) = temp_coordinator(sender.address());
        let id = coordinator
            .submit_transaction(&sender.secret_hex(), sender.address(), addr(2), beck(10), beck(1))
            .unwrap();

        assert!(matches!(
            coordinator.transaction_details(&id).unwrap(),
            Some(TxDetails::Pending { .. })
        ));

        let template = coordinator.block_template(addr(3)).unwrap();
        let mined = mine_template(&template);
        coordinator.submit_block(template.block, mined.hash, mined.nonce);

        match coordinator.transaction_details(&id).unwrap() {
            Some(TxDetails::Confirmed { block_height, .. }) => assert_eq!(block_height, 1),
            other => panic!("expected confirmed, got {other:?}"),
        }

        assert!(coordinator
            .transaction_details(&Hash256([0xCD; 32]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn submit_transaction_rejects_insufficient_funds() {
        let sender = keypair(1);
        let (coordinator, _dir) = temp_coordinator(sender.address());
        let err = coordinator
            .submit_transaction(&sender.secret_hex(), sender.address(), addr(2), beck(1000), Amount::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("insufficient funds"));
        assert!(coordinator.pending_transactions().is_empty());
    }
}
