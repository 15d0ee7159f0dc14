//! Difficulty retargeting schedule.
//!
//! Every [`DIFFICULTY_ADJUSTMENT_INTERVAL`] blocks the difficulty is
//! rescaled by the ratio of the expected window span to the observed span.
//! The observed span is clamped to a 4x swing per adjustment so timestamp
//! manipulation cannot move the difficulty arbitrarily, and the result is
//! clamped to `[MIN_DIFFICULTY, MAX_DIFFICULTY]`.
//!
//! Retargeting is scheduled by block height at template construction time;
//! the span is measured from block timestamps, so the current difficulty
//! can always be recomputed from the chain itself after a restart.

use crate::constants::{
    DIFFICULTY_ADJUSTMENT_INTERVAL, MAX_DIFFICULTY, MIN_DIFFICULTY, TARGET_BLOCK_TIME_SECS,
};

/// Seconds a full adjustment window is expected to take.
pub const fn target_span_secs() -> i64 {
    DIFFICULTY_ADJUSTMENT_INTERVAL as i64 * TARGET_BLOCK_TIME_SECS
}

/// Whether the block at `height` starts a new adjustment window.
pub fn is_adjustment_height(height: u64) -> bool {
    height > 0 && height % DIFFICULTY_ADJUSTMENT_INTERVAL == 0
}

/// Compute the next difficulty from the observed span of the last window.
///
/// `new = round(current * target_span / clamp(actual, span/4, span*4))`,
/// clamped to the legal difficulty range. Note that difficulty and span
/// move in the same direction: a short span means blocks came too fast,
/// so the difficulty rises.
pub fn next_difficulty(current: u32, actual_span_secs: i64) -> u32 {
    let target = target_span_secs();
    let clamped = actual_span_secs.clamp(target / 4, target * 4);

    // Integer round-half-up; magnitudes are tiny (current <= 64).
    let scaled = (i64::from(current) * target + clamped / 2) / clamped;
    scaled.clamp(i64::from(MIN_DIFFICULTY), i64::from(MAX_DIFFICULTY)) as u32
}
