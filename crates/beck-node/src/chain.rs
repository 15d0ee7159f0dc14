//! Chain state: genesis bootstrap, tip advancement, UTXO-scan queries,
//! and the append-block validation pipeline.
//!
//! The chain owns the block store plus the current difficulty. All queries
//! walk the chain from the tip back to genesis; that is linear in chain
//! length and acceptable for the intended workload. Spent-output tracking
//! attributes an input to an address by deriving the address from the
//! input's public key, so scans never resolve previous transactions.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use beck_core::address::Address;
use beck_core::amount::Amount;
use beck_core::constants::{DIFFICULTY_ADJUSTMENT_INTERVAL, GENESIS_COINBASE_DATA, MINING_REWARD};
use beck_core::crypto::{self, KeyPair};
use beck_core::difficulty;
use beck_core::error::{BeckError, BlockError, ChainError, TransactionError, ValidationError};
use beck_core::pow;
use beck_core::types::{Block, Hash256, OutPoint, Transaction, TxInput, TxOrigin, TxOutput};

use crate::storage::BlockStore;

/// Direction of a history entry relative to the queried address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryKind {
    Sent,
    Received,
    MiningReward,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
            Self::MiningReward => "mining_reward",
        }
    }
}

/// One address-relevant transaction, as reported by [`Chain::history`].
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryItem {
    pub tx_id: Hash256,
    pub from: TxOrigin,
    pub to: Address,
    pub amount: Amount,
    pub fee: Amount,
    pub block_height: u64,
    pub timestamp: i64,
    pub kind: HistoryKind,
}

/// The canonical chain: a block store plus the cached tip and the
/// difficulty in effect for the next block.
pub struct Chain {
    store: BlockStore,
    tip: Hash256,
    height: u64,
    difficulty: u32,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Whether the input's public key derives to `address`. This is how the
/// UTXO scan attributes spends without resolving previous transactions.
fn input_signed_by(input: &TxInput, address: &Address) -> bool {
    crypto::derive_address(&input.public_key).is_ok_and(|a| a == *address)
}

impl Chain {
    /// Create a fresh chain at `path` with a mined genesis block rewarding
    /// `genesis_address`. Fails if the store already holds a chain.
    pub fn create(
        path: impl AsRef<Path>,
        genesis_address: Address,
        initial_difficulty: u32,
    ) -> Result<Self, BeckError> {
        let store = BlockStore::open(&path)?;
        if !store.is_empty()? {
            return Err(ChainError::AlreadyExists.into());
        }

        let coinbase = Transaction::coinbase(
            genesis_address,
            GENESIS_COINBASE_DATA.as_bytes(),
            Amount::ZERO,
        )
        .map_err(BeckError::from)?;
        let mut genesis = Block::new(
            vec![coinbase],
            Hash256::ZERO,
            0,
            initial_difficulty,
            unix_now(),
        );

        info!(difficulty = initial_difficulty, "mining genesis block");
        if !pow::mine(&mut genesis, &AtomicBool::new(false)) {
            return Err(ChainError::GenesisExhausted.into());
        }
        store.append(&genesis)?;
        info!(hash = %genesis.hash, %genesis_address, "created chain");

        Ok(Self {
            tip: genesis.hash,
            height: 0,
            difficulty: initial_difficulty,
            store,
        })
    }

    /// Open an existing chain. Fails with [`ChainError::EmptyStore`] if the
    /// store holds no blocks; there is no silent auto-genesis path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BeckError> {
        let store = BlockStore::open(&path)?;
        let tip = store.tip_hash()?.ok_or(ChainError::EmptyStore)?;
        let tip_block = store
            .get(&tip)?
            .ok_or_else(|| BeckError::Storage(format!("tip block {tip} missing")))?;
        info!(height = tip_block.height, hash = %tip, "opened chain");
        Ok(Self {
            tip,
            height: tip_block.height,
            // The difficulty in effect is the tip's; a pending retarget
            // boundary is re-applied at template construction time.
            difficulty: tip_block.difficulty,
            store,
        })
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.tip
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// The block at the tip.
    pub fn last_block(&self) -> Result<Block, BeckError> {
        self.store
            .get(&self.tip)?
            .ok_or_else(|| BeckError::Storage(format!("tip block {} missing", self.tip)))
    }

    /// Lazy iterator from the tip back to genesis. Restartable: each call
    /// returns a fresh iterator.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            store: &self.store,
            next: Some(self.tip),
        }
    }

    /// Fetch any committed block by hash.
    pub fn find_block(&self, hash: &Hash256) -> Result<Option<Block>, BeckError> {
        self.store.get(hash)
    }

    /// Find a committed transaction by id.
    pub fn find_tx(&self, id: &Hash256) -> Result<Transaction, BeckError> {
        match self.find_tx_entry(id)? {
            Some((tx, _, _)) => Ok(tx),
            None => Err(ChainError::TxNotFound.into()),
        }
    }

    /// Find a committed transaction along with its block height and
    /// timestamp.
    pub fn find_tx_entry(
        &self,
        id: &Hash256,
    ) -> Result<Option<(Transaction, u64, i64)>, BeckError> {
        for block in self.iter() {
            let block = block?;
            if let Some(tx) = block.transactions.iter().find(|tx| tx.id == *id) {
                return Ok(Some((tx.clone(), block.height, block.timestamp)));
            }
        }
        Ok(None)
    }

    /// Walk the chain and collect every unspent output addressed to
    /// `address`, in chain-iteration order (later blocks first, declared
    /// order within a block).
    fn unspent_outputs(
        &self,
        address: &Address,
    ) -> Result<Vec<(Hash256, i64, Amount)>, BeckError> {
        let mut spent: HashMap<Hash256, HashSet<i64>> = HashMap::new();
        let mut unspent = Vec::new();

        for block in self.iter() {
            let block = block?;
            for tx in &block.transactions {
                for (index, output) in tx.outputs.iter().enumerate() {
                    let vout = index as i64;
                    if spent.get(&tx.id).is_some_and(|s| s.contains(&vout)) {
                        continue;
                    }
                    if output.address == *address {
                        unspent.push((tx.id, vout, output.value));
                    }
                }
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        if input_signed_by(input, address) {
                            spent
                                .entry(input.previous_output.txid)
                                .or_default()
                                .insert(input.previous_output.vout);
                        }
                    }
                }
            }
        }
        Ok(unspent)
    }

    /// Greedily select unspent outputs of `address` until `required` is
    /// covered. Returns the accumulated value and the selected outputs
    /// grouped by transaction id; the accumulated value may fall short.
    pub fn find_spendable(
        &self,
        address: &Address,
        required: Amount,
    ) -> Result<(Amount, HashMap<Hash256, Vec<i64>>), BeckError> {
        let mut accumulated = Amount::ZERO;
        let mut selected: HashMap<Hash256, Vec<i64>> = HashMap::new();

        for (txid, vout, value) in self.unspent_outputs(address)? {
            if accumulated >= required {
                break;
            }
            accumulated = accumulated
                .checked_add(value)
                .ok_or(TransactionError::ValueOverflow)
                .map_err(BeckError::from)?;
            selected.entry(txid).or_default().push(vout);
        }
        Ok((accumulated, selected))
    }

    /// Sum of all unspent outputs addressed to `address`.
    pub fn balance(&self, address: &Address) -> Result<Amount, BeckError> {
        let mut total = Amount::ZERO;
        for (_, _, value) in self.unspent_outputs(address)? {
            total = total
                .checked_add(value)
                .ok_or(TransactionError::ValueOverflow)
                .map_err(BeckError::from)?;
        }
        Ok(total)
    }

    /// Transaction history for `address`, ascending by `(height, timestamp)`.
    pub fn history(&self, address: &Address) -> Result<Vec<HistoryItem>, BeckError> {
        let mut items = Vec::new();
        for block in self.iter() {
            let block = block?;
            for tx in &block.transactions {
                let received = tx.outputs.iter().any(|o| o.address == *address);
                let sent = !tx.is_coinbase()
                    && tx.inputs.iter().any(|i| input_signed_by(i, address));

                let kind = if sent {
                    HistoryKind::Sent
                } else if received && tx.is_coinbase() {
                    HistoryKind::MiningReward
                } else if received {
                    HistoryKind::Received
                } else {
                    continue;
                };

                items.push(HistoryItem {
                    tx_id: tx.id,
                    from: tx.from,
                    to: tx.to,
                    amount: tx.amount,
                    fee: tx.fee,
                    block_height: block.height,
                    timestamp: block.timestamp,
                    kind,
                });
            }
        }
        items.sort_by_key(|item| (item.block_height, item.timestamp));
        Ok(items)
    }

    /// Every committed transaction with its block height and timestamp,
    /// newest block first.
    pub fn all_transactions(&self) -> Result<Vec<(Transaction, u64, i64)>, BeckError> {
        let mut all = Vec::new();
        for block in self.iter() {
            let block = block?;
            for tx in &block.transactions {
                all.push((tx.clone(), block.height, block.timestamp));
            }
        }
        Ok(all)
    }

    /// All blocks, newest first.
    pub fn blocks(&self) -> Result<Vec<Block>, BeckError> {
        self.iter().collect()
    }

    /// Assemble an unmined block on top of the current tip.
    pub fn prepare_block(&self, transactions: Vec<Transaction>) -> Block {
        Block::new(
            transactions,
            self.tip,
            self.height + 1,
            self.difficulty,
            unix_now(),
        )
    }

    /// Look up the previous transaction for every input of `tx`.
    pub fn resolve_prev_txs(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<Hash256, Transaction>, BeckError> {
        let mut prev = HashMap::new();
        for input in &tx.inputs {
            let txid = input.previous_output.txid;
            if prev.contains_key(&txid) {
                continue;
            }
            let found = self.find_tx(&txid)?;
            prev.insert(txid, found);
        }
        Ok(prev)
    }

    /// The value of the output referenced by `input`, resolved through a
    /// previously collected `prev_txs` map.
    fn referenced_value(
        prev_txs: &HashMap<Hash256, Transaction>,
        input: &TxInput,
    ) -> Result<Amount, BeckError> {
        let prev = prev_txs
            .get(&input.previous_output.txid)
            .ok_or_else(|| {
                TransactionError::MissingPrevTx(input.previous_output.txid.to_string())
            })
            .map_err(BeckError::from)?;
        usize::try_from(input.previous_output.vout)
            .ok()
            .and_then(|vout| prev.outputs.get(vout))
            .map(|output| output.value)
            .ok_or_else(|| {
                TransactionError::MissingPrevOutput {
                    outpoint: input.previous_output.to_string(),
                }
                .into()
            })
    }

    /// Validate and commit a mined block, advancing the tip.
    ///
    /// Invariants are checked in a fixed order: duplicate hash, linkage and
    /// height, proof of work, input signatures, coinbase amount, value
    /// conservation and double spends, then the atomic commit. On any
    /// failure the chain state is unchanged.
    pub fn append_block(&mut self, block: &Block) -> Result<(), BeckError> {
        if self.store.contains(&block.hash)? {
            return Err(BlockError::BlockExists.into());
        }
        if block.height != self.height + 1 {
            return Err(BlockError::WrongHeight {
                got: block.height,
                want: self.height + 1,
            }
            .into());
        }
        if block.prev_block_hash != self.tip {
            return Err(BlockError::NotLinkedToTip.into());
        }
        if !pow::validate(block) {
            return Err(BlockError::InvalidPoW.into());
        }

        for tx in &block.transactions {
            if tx.is_coinbase() {
                continue;
            }
            let prev_txs = self.resolve_prev_txs(tx)?;
            tx.verify(&prev_txs).map_err(|_| BlockError::InvalidTxSignature {
                txid: tx.id.to_string(),
            })?;
        }

        let coinbase_count = block
            .transactions
            .iter()
            .filter(|tx| tx.is_coinbase())
            .count();
        if coinbase_count != 1 {
            return Err(BlockError::InvalidCoinbase(format!(
                "expected one coinbase, found {coinbase_count}"
            ))
            .into());
        }
        let total_fees = block
            .total_fees()
            .ok_or(TransactionError::ValueOverflow)
            .map_err(BeckError::from)?;
        let expected = MINING_REWARD
            .checked_add(total_fees)
            .ok_or(TransactionError::ValueOverflow)
            .map_err(BeckError::from)?;
        let coinbase = block
            .coinbase()
            .ok_or_else(|| BlockError::InvalidCoinbase("missing".into()))?;
        let coinbase_value = coinbase
            .total_output_value()
            .ok_or(TransactionError::ValueOverflow)
            .map_err(BeckError::from)?;
        if coinbase_value != expected {
            return Err(BlockError::InvalidCoinbase(format!(
                "output {coinbase_value} != reward {expected}"
            ))
            .into());
        }

        let mut block_spends: HashSet<OutPoint> = HashSet::new();
        for tx in &block.transactions {
            if tx.is_coinbase() {
                continue;
            }
            let prev_txs = self.resolve_prev_txs(tx)?;
            let mut input_sum = Amount::ZERO;
            for input in &tx.inputs {
                if !block_spends.insert(input.previous_output) {
                    return Err(BlockError::DoubleSpend {
                        outpoint: input.previous_output.to_string(),
                    }
                    .into());
                }
                let value = Self::referenced_value(&prev_txs, input)?;
                input_sum = input_sum
                    .checked_add(value)
                    .ok_or(TransactionError::ValueOverflow)
                    .map_err(BeckError::from)?;
            }
            let output_sum = tx
                .total_output_value()
                .ok_or(TransactionError::ValueOverflow)
                .map_err(BeckError::from)?;
            if input_sum < output_sum {
                return Err(BlockError::ValueConservation {
                    txid: tx.id.to_string(),
                }
                .into());
            }
            let implied_fee = input_sum
                .checked_sub(output_sum)
                .ok_or(TransactionError::ValueOverflow)
                .map_err(BeckError::from)?;
            if implied_fee != tx.fee {
                return Err(BlockError::FeeMismatch {
                    txid: tx.id.to_string(),
                }
                .into());
            }
        }

        // Any outpoint spent by this block must still be unspent on chain.
        if !block_spends.is_empty() {
            for committed in self.iter() {
                let committed = committed?;
                for tx in &committed.transactions {
                    if tx.is_coinbase() {
                        continue;
                    }
                    for input in &tx.inputs {
                        if block_spends.contains(&input.previous_output) {
                            return Err(BlockError::DoubleSpend {
                                outpoint: input.previous_output.to_string(),
                            }
                            .into());
                        }
                    }
                }
            }
        }

        self.store.append(block)?;
        self.tip = block.hash;
        self.height = block.height;
        self.difficulty = block.difficulty;
        info!(height = block.height, hash = %block.hash, "appended block");
        Ok(())
    }

    /// Apply the retargeting schedule for the block about to be built at
    /// `next_height`; returns the difficulty in effect afterwards.
    ///
    /// The observed span is the tip timestamp minus the timestamp of the
    /// block one full interval back.
    pub fn retarget_if_due(&mut self, next_height: u64) -> Result<u32, BeckError> {
        if !difficulty::is_adjustment_height(next_height) {
            return Ok(self.difficulty);
        }
        let tip = self.last_block()?;
        let anchor = self.block_at_height(next_height - DIFFICULTY_ADJUSTMENT_INTERVAL)?;
        let span = tip.timestamp - anchor.timestamp;
        let next = difficulty::next_difficulty(self.difficulty, span);
        if next != self.difficulty {
            info!(
                old = self.difficulty,
                new = next,
                span_secs = span,
                "difficulty retarget"
            );
        }
        self.difficulty = next;
        Ok(next)
    }

    fn block_at_height(&self, height: u64) -> Result<Block, BeckError> {
        for block in self.iter() {
            let block = block?;
            if block.height == height {
                return Ok(block);
            }
        }
        Err(ChainError::BlockNotFound.into())
    }

    /// Build and sign a payment of `amount` from `from` to `to` with the
    /// given fee, selecting inputs greedily from the sender's unspent
    /// outputs and returning any change to the sender.
    pub fn build_transaction(
        &self,
        secret_hex: &str,
        from: Address,
        to: Address,
        amount: Amount,
        fee: Amount,
    ) -> Result<Transaction, BeckError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if fee.is_negative() {
            return Err(ValidationError::NegativeFee.into());
        }
        let keypair = KeyPair::from_secret_hex(secret_hex).map_err(BeckError::from)?;
        if keypair.address() != from {
            return Err(ValidationError::KeyAddressMismatch.into());
        }

        let required = amount
            .checked_add(fee)
            .ok_or(TransactionError::ValueOverflow)
            .map_err(BeckError::from)?;
        let (accumulated, selected) = self.find_spendable(&from, required)?;
        if accumulated < required {
            return Err(ChainError::InsufficientFunds {
                have: accumulated,
                need: required,
            }
            .into());
        }

        // Deterministic input order regardless of map iteration order.
        let mut entries: Vec<(Hash256, Vec<i64>)> = selected.into_iter().collect();
        entries.sort_by_key(|(txid, _)| *txid);

        let pubkey = keypair.public_key_bytes().to_vec();
        let mut inputs = Vec::new();
        for (txid, vouts) in entries {
            for vout in vouts {
                inputs.push(TxInput {
                    previous_output: OutPoint { txid, vout },
                    signature: Vec::new(),
                    public_key: pubkey.clone(),
                });
            }
        }

        let mut outputs = vec![TxOutput { value: amount, address: to }];
        if accumulated > required {
            let change = accumulated
                .checked_sub(required)
                .ok_or(TransactionError::ValueOverflow)
                .map_err(BeckError::from)?;
            outputs.push(TxOutput { value: change, address: from });
        }

        let mut tx = Transaction {
            id: Hash256::ZERO,
            inputs,
            outputs,
            from: TxOrigin::Address(from),
            to,
            amount,
            fee,
            signature: Vec::new(),
        };
        tx.id = tx.compute_id().map_err(BeckError::from)?;

        let prev_txs = self.resolve_prev_txs(&tx)?;
        tx.sign(&keypair, &prev_txs).map_err(BeckError::from)?;
        debug!(id = %tx.id, %from, %to, %amount, %fee, "built transaction");
        Ok(tx)
    }
}

/// Iterator over blocks from the tip back to genesis.
pub struct ChainIter<'a> {
    store: &'a BlockStore,
    next: Option<Hash256>,
}

impl Iterator for ChainIter<'_> {
    type Item = Result<Block, BeckError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.store.get(&hash) {
            Ok(Some(block)) => {
                if !block.prev_block_hash.is_zero() {
                    self.next = Some(block.prev_block_hash);
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(BeckError::Storage(format!("missing block {hash}")))),
            Err(e) => Some(Err(e)),
        }
    }
}
