//! Fixed-point monetary amounts.
//!
//! 1 BECK = 10^8 becks. Amounts are signed 64-bit minor units so that
//! conservation checks are exact integer arithmetic; negative values are
//! representable but rejected at validation boundaries (`amount > 0`,
//! `fee >= 0`). JSON carries amounts as decimal strings to avoid float
//! precision loss; the binary encoding is the raw minor-unit integer.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::COIN;
use crate::error::AmountError;

/// A monetary value in becks (minor units).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Construct from minor units (becks).
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// The raw minor-unit value.
    pub const fn to_minor(self) -> i64 {
        self.0
    }

    /// Construct from whole BECK. Returns `None` on overflow.
    pub fn from_becks(becks: i64) -> Option<Self> {
        becks.checked_mul(COIN).map(Self)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checked sum over an iterator of amounts.
    pub fn checked_sum(iter: impl IntoIterator<Item = Self>) -> Option<Self> {
        iter.into_iter()
            .try_fold(Self::ZERO, |acc, value| acc.checked_add(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / COIN as u64;
        let frac = abs % COIN as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let digits = format!("{frac:08}");
            write!(f, "{sign}{whole}.{}", digits.trim_end_matches('0'))
        }
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if body.is_empty() {
            return Err(AmountError::Malformed(s.to_string()));
        }

        let (whole_str, frac_str) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(AmountError::Malformed(s.to_string()));
        }
        if frac_str.len() > 8 {
            return Err(AmountError::Precision);
        }
        if !whole_str.chars().all(|c| c.is_ascii_digit())
            || !frac_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountError::Malformed(s.to_string()));
        }

        // Widen to i128 so the magnitude of i64::MIN parses cleanly.
        let whole: i128 = if whole_str.is_empty() {
            0
        } else {
            whole_str.parse().map_err(|_| AmountError::Overflow)?
        };
        // Right-pad the fraction to 8 digits: "5" means 0.50000000.
        let mut frac: i128 = 0;
        if !frac_str.is_empty() {
            frac = frac_str.parse().map_err(|_| AmountError::Overflow)?;
            frac *= 10i128.pow(8 - frac_str.len() as u32);
        }

        let magnitude = whole
            .checked_mul(COIN as i128)
            .and_then(|w| w.checked_add(frac))
            .ok_or(AmountError::Overflow)?;
        let minor = if negative { -magnitude } else { magnitude };
        let minor = i64::try_from(minor).map_err(|_| AmountError::Overflow)?;
        Ok(Self(minor))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
