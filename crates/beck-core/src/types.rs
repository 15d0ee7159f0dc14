//! Core protocol types: transactions and blocks.
//!
//! The canonical binary encoding everywhere is bincode with the standard
//! config. The same encoding backs transaction-id hashing, the trimmed-copy
//! signing scheme, block storage, and size estimation; changing it is a
//! consensus break.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::address::Address;
use crate::amount::Amount;
use crate::constants::MINING_REWARD;
use crate::crypto::{self, KeyPair};
use crate::error::{AddressError, TransactionError};

/// A 32-byte hash value.
///
/// Used for transaction ids (Keccak-256) and block header hashes (SHA-256).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Marks the genesis parent and unmined block hashes.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction id containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within that transaction; `-1` marks coinbase.
    pub vout: i64,
}

impl OutPoint {
    /// The null outpoint used by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            vout: -1,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == -1
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// A transaction input, spending a previous output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null for coinbase inputs.
    pub previous_output: OutPoint,
    /// 65-byte recoverable ECDSA signature. Empty until signed.
    pub signature: Vec<u8>,
    /// 65-byte uncompressed public key of the spender. Empty for coinbase.
    pub public_key: Vec<u8>,
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in becks.
    pub value: Amount,
    /// Recipient address.
    pub address: Address,
}

/// Who a transaction's summary `from` field points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum TxOrigin {
    /// Newly minted coins; renders as the string `"coinbase"`.
    Coinbase,
    Address(Address),
}

impl TxOrigin {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Coinbase => None,
            Self::Address(addr) => Some(*addr),
        }
    }
}

impl fmt::Display for TxOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coinbase => write!(f, "coinbase"),
            Self::Address(addr) => write!(f, "{addr}"),
        }
    }
}

impl FromStr for TxOrigin {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("coinbase") {
            Ok(Self::Coinbase)
        } else {
            s.parse().map(Self::Address)
        }
    }
}

impl Serialize for TxOrigin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxOrigin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A transaction transferring value between addresses.
///
/// `from`, `to` and `amount` summarize the primary payment and are bound
/// into the id hash; `fee` and the signatures are not.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Keccak-256 id over the canonical encoding (see [`compute_id`](Self::compute_id)).
    pub id: Hash256,
    /// Inputs consuming previous outputs.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Sender summary, or coinbase.
    pub from: TxOrigin,
    /// Primary recipient.
    pub to: Address,
    /// Primary payment amount.
    pub amount: Amount,
    /// Declared fee; must equal inputs minus outputs at commit time.
    pub fee: Amount,
    /// Coinbase data for coinbase transactions; unused otherwise.
    pub signature: Vec<u8>,
}

/// The fields bound into the transaction id, in declaration order.
/// Input signatures are cleared before encoding.
#[derive(bincode::Encode)]
struct IdPreimage {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    from: TxOrigin,
    to: Address,
    amount: Amount,
}

impl Transaction {
    /// Compute the transaction id: Keccak-256 over the canonical encoding
    /// of `(inputs, outputs, from, to, amount)` with every input signature
    /// cleared. The `fee`, the top-level `signature`, and the id itself are
    /// excluded.
    pub fn compute_id(&self) -> Result<Hash256, TransactionError> {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                previous_output: input.previous_output,
                signature: Vec::new(),
                public_key: input.public_key.clone(),
            })
            .collect();
        let preimage = IdPreimage {
            inputs,
            outputs: self.outputs.clone(),
            from: self.from,
            to: self.to,
            amount: self.amount,
        };
        let encoded = bincode::encode_to_vec(&preimage, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(crypto::keccak256(&encoded))
    }

    /// Build a coinbase transaction paying `to` the mining reward plus
    /// `total_fees`, with `data` stored in place of a signature.
    ///
    /// The data also occupies the input's key slot, which is bound into
    /// the id hash; callers keep ids distinct across blocks by including
    /// the height in the data.
    pub fn coinbase(
        to: Address,
        data: &[u8],
        total_fees: Amount,
    ) -> Result<Self, TransactionError> {
        let reward = MINING_REWARD
            .checked_add(total_fees)
            .ok_or(TransactionError::ValueOverflow)?;
        let mut tx = Self {
            id: Hash256::ZERO,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature: Vec::new(),
                public_key: data.to_vec(),
            }],
            outputs: vec![TxOutput {
                value: reward,
                address: to,
            }],
            from: TxOrigin::Coinbase,
            to,
            amount: reward,
            fee: Amount::ZERO,
            signature: data.to_vec(),
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    /// Whether this is a coinbase transaction: a single input spending the
    /// null outpoint. The tag is structural; `from` is only a summary.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Checked sum of all output values.
    pub fn total_output_value(&self) -> Option<Amount> {
        Amount::checked_sum(self.outputs.iter().map(|o| o.value))
    }

    /// Serialized size in bytes under the canonical encoding.
    pub fn encoded_size(&self) -> Result<usize, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map(|bytes| bytes.len())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// The output referenced by input `index`, resolved through `prev_txs`.
    fn referenced_output<'a>(
        &self,
        index: usize,
        prev_txs: &'a HashMap<Hash256, Transaction>,
    ) -> Result<&'a TxOutput, TransactionError> {
        let input = self
            .inputs
            .get(index)
            .ok_or(TransactionError::InputIndexOutOfBounds {
                index,
                len: self.inputs.len(),
            })?;
        let prev = prev_txs
            .get(&input.previous_output.txid)
            .ok_or_else(|| {
                TransactionError::MissingPrevTx(input.previous_output.txid.to_string())
            })?;
        usize::try_from(input.previous_output.vout)
            .ok()
            .and_then(|vout| prev.outputs.get(vout))
            .ok_or_else(|| TransactionError::MissingPrevOutput {
                outpoint: input.previous_output.to_string(),
            })
    }

    /// A copy with every input's signature and public key cleared, ready
    /// for the per-input digest substitution.
    fn trimmed_copy(&self) -> Self {
        Self {
            id: self.id,
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput {
                    previous_output: input.previous_output,
                    signature: Vec::new(),
                    public_key: Vec::new(),
                })
                .collect(),
            outputs: self.outputs.clone(),
            from: self.from,
            to: self.to,
            amount: self.amount,
            fee: self.fee,
            signature: Vec::new(),
        }
    }

    /// The digest signed for input `index`.
    ///
    /// Built from the trimmed copy with the referenced output's address
    /// string substituted into the input's public-key slot, hashed to an
    /// id, then hashed once more with Keccak-256.
    pub fn signing_digest(
        &self,
        index: usize,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<Hash256, TransactionError> {
        let owner = self.referenced_output(index, prev_txs)?.address;
        let mut copy = self.trimmed_copy();
        copy.inputs[index].public_key = owner.to_string().into_bytes();
        let id = copy.compute_id()?;
        Ok(crypto::keccak256(id.as_bytes()))
    }

    /// Sign every input with `keypair`. Coinbase transactions are left
    /// untouched. `prev_txs` must contain every referenced transaction.
    pub fn sign(
        &mut self,
        keypair: &KeyPair,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }
        for index in 0..self.inputs.len() {
            let digest = self.signing_digest(index, prev_txs)?;
            self.inputs[index].signature = keypair.sign_digest(&digest).to_vec();
        }
        Ok(())
    }

    /// Verify every input signature. For each input, the address recovered
    /// from the signature must equal the address on the referenced output.
    /// Coinbase transactions verify trivially.
    pub fn verify(
        &self,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }
        for index in 0..self.inputs.len() {
            let owner = self.referenced_output(index, prev_txs)?.address;
            let digest = self.signing_digest(index, prev_txs)?;
            let recovered = crypto::recover_address(&digest, &self.inputs[index].signature)
                .map_err(|_| TransactionError::InvalidSignature { index })?;
            if recovered != owner {
                return Err(TransactionError::InvalidSignature { index });
            }
        }
        Ok(())
    }
}

/// A block in the chain.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Ordered transactions; the coinbase is last.
    pub transactions: Vec<Transaction>,
    /// Parent block hash; zero for genesis.
    pub prev_block_hash: Hash256,
    /// Header hash once mined; zero in templates.
    pub hash: Hash256,
    /// Proof-of-work nonce.
    pub nonce: i64,
    /// Distance from genesis.
    pub height: u64,
    /// Difficulty this block was mined at; part of the header preimage.
    pub difficulty: u32,
}

impl Block {
    /// Assemble an unmined block (nonce 0, zero hash).
    pub fn new(
        transactions: Vec<Transaction>,
        prev_block_hash: Hash256,
        height: u64,
        difficulty: u32,
        timestamp: i64,
    ) -> Self {
        Self {
            timestamp,
            transactions,
            prev_block_hash,
            hash: Hash256::ZERO,
            nonce: 0,
            height,
            difficulty,
        }
    }

    /// Flat SHA-256 digest over the concatenated transaction ids.
    pub fn transactions_digest(&self) -> Hash256 {
        let mut data = Vec::with_capacity(self.transactions.len() * 32);
        for tx in &self.transactions {
            data.extend_from_slice(tx.id.as_bytes());
        }
        crypto::sha256(&data)
    }

    /// Header hash for a candidate nonce:
    /// `SHA-256(prev ‖ tx_digest ‖ be64(timestamp) ‖ be64(difficulty) ‖ be64(nonce))`.
    pub fn header_hash(&self, nonce: i64) -> Hash256 {
        self.header_hash_with(&self.transactions_digest(), nonce)
    }

    /// Header hash with a precomputed transactions digest. The nonce loop
    /// uses this to avoid rehashing the (nonce-independent) digest.
    pub(crate) fn header_hash_with(&self, tx_digest: &Hash256, nonce: i64) -> Hash256 {
        let mut data = Vec::with_capacity(32 + 32 + 8 * 3);
        data.extend_from_slice(self.prev_block_hash.as_bytes());
        data.extend_from_slice(tx_digest.as_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&i64::from(self.difficulty).to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        crypto::sha256(&data)
    }

    /// The block's coinbase transaction, if present.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.is_coinbase())
    }

    /// Checked sum of the declared fees of all non-coinbase transactions.
    pub fn total_fees(&self) -> Option<Amount> {
        Amount::checked_sum(
            self.transactions
                .iter()
                .filter(|tx| !tx.is_coinbase())
                .map(|tx| tx.fee),
        )
    }

    /// Serialized size in bytes under the canonical encoding.
    pub fn encoded_size(&self) -> Result<usize, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map(|bytes| bytes.len())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }
}
