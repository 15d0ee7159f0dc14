//! Error types for the Beck protocol.
use thiserror::Error;

use crate::amount::Amount;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be 40 hex characters with an optional 0x prefix")] InvalidLength,
    #[error("invalid hex in address")] InvalidHex,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("malformed amount: {0}")] Malformed(String),
    #[error("more than 8 fractional digits")] Precision,
    #[error("amount overflow")] Overflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid private key")] InvalidSecretKey,
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature recovery failed")] RecoveryFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("serialization: {0}")] Serialization(String),
    #[error("value overflow")] ValueOverflow,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("referenced transaction not found: {0}")] MissingPrevTx(String),
    #[error("referenced output out of range: {outpoint}")] MissingPrevOutput { outpoint: String },
    #[error("invalid signature on input {index}")] InvalidSignature { index: usize },
    #[error(transparent)] Crypto(#[from] CryptoError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("block already exists")] BlockExists,
    #[error("invalid block height: got {got}, want {want}")] WrongHeight { got: u64, want: u64 },
    #[error("block does not link to current tip")] NotLinkedToTip,
    #[error("invalid proof of work")] InvalidPoW,
    #[error("invalid signature in transaction {txid}")] InvalidTxSignature { txid: String },
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
    #[error("outputs exceed inputs in transaction {txid}")] ValueConservation { txid: String },
    #[error("declared fee does not match inputs minus outputs in transaction {txid}")] FeeMismatch { txid: String },
    #[error("double spend of {outpoint}")] DoubleSpend { outpoint: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain already exists")] AlreadyExists,
    #[error("no chain found in store; create one first")] EmptyStore,
    #[error("transaction not found")] TxNotFound,
    #[error("block not found")] BlockNotFound,
    #[error("nonce space exhausted while mining genesis")] GenesisExhausted,
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: Amount, need: Amount },
}

/// Ingress-level request validation failures; surface as 400 at the HTTP
/// boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be positive")] NonPositiveAmount,
    #[error("fee must not be negative")] NegativeFee,
    #[error("private key does not control the sender address")] KeyAddressMismatch,
}

#[derive(Error, Debug)]
pub enum BeckError {
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Amount(#[from] AmountError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error("storage: {0}")] Storage(String),
}
