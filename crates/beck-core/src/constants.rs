//! Protocol constants. All monetary values in becks (1 BECK = 10^8 becks).

use crate::amount::Amount;

pub const COIN: i64 = 100_000_000;

/// Block subsidy paid to the miner, before fees.
pub const MINING_REWARD: Amount = Amount::from_minor(50 * COIN);

/// Desired seconds between blocks.
pub const TARGET_BLOCK_TIME_SECS: i64 = 30;

/// Blocks between difficulty adjustments.
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 2016;

/// Maximum serialized block size in bytes (1 MiB).
pub const MAX_BLOCK_SIZE: usize = 1_048_576;

pub const MIN_DIFFICULTY: u32 = 1;
pub const MAX_DIFFICULTY: u32 = 64;
pub const INITIAL_DIFFICULTY: u32 = 24;

/// Bytes reserved for the block header when budgeting a template.
pub const BLOCK_HEADER_RESERVE: usize = 80;

/// Bytes reserved for the coinbase transaction when budgeting a template.
pub const COINBASE_RESERVE: usize = 100;

/// Nonces between cancellation checks in the proof-of-work search loop.
pub const CANCEL_CHECK_INTERVAL: i64 = 100_000;

/// Seconds a miner backs off after an RPC or submission error.
pub const MINER_BACKOFF_SECS: u64 = 5;

/// Data embedded in the genesis coinbase.
pub const GENESIS_COINBASE_DATA: &str = "Beck genesis block";

/// Data embedded in every post-genesis coinbase.
pub const COINBASE_DATA: &str = "Mining reward";
