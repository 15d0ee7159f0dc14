//! 20-byte account addresses.
//!
//! An address is the last 20 bytes of the Keccak-256 hash of the
//! uncompressed secp256k1 public key body (see [`crypto::derive_address`]
//! (crate::crypto::derive_address)). The canonical text form is `0x` plus
//! 40 lowercase hex digits; parsing is case-insensitive, and because the
//! stored form is raw bytes, comparisons are case-insensitive too.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;

/// A 20-byte account identifier.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if body.len() != 40 {
            return Err(AddressError::InvalidLength);
        }
        let bytes = hex::decode(body).map_err(|_| AddressError::InvalidHex)?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "0x00000000000000000000000000000000000000ab";

    #[test]
    fn display_is_lowercase_with_prefix() {
        let mut bytes = [0u8; 20];
        bytes[19] = 0xAB;
        assert_eq!(Address::from_bytes(bytes).to_string(), SAMPLE);
    }

    #[test]
    fn parse_round_trip() {
        let addr: Address = SAMPLE.parse().unwrap();
        assert_eq!(addr.to_string(), SAMPLE);
    }

    #[test]
    fn parse_is_case_insensitive() {
        let lower: Address = SAMPLE.parse().unwrap();
        let upper: Address = SAMPLE.to_uppercase().parse().unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn parse_accepts_missing_prefix() {
        let with: Address = SAMPLE.parse().unwrap();
        let without: Address = SAMPLE.trim_start_matches("0x").parse().unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert_eq!("0x1234".parse::<Address>().unwrap_err(), AddressError::InvalidLength);
        assert_eq!("".parse::<Address>().unwrap_err(), AddressError::InvalidLength);
    }

    #[test]
    fn parse_rejects_non_hex() {
        let bad = format!("0x{}", "zz".repeat(20));
        assert_eq!(bad.parse::<Address>().unwrap_err(), AddressError::InvalidHex);
    }

    #[test]
    fn serde_json_round_trip() {
        let addr: Address = SAMPLE.parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{SAMPLE}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn bincode_round_trip() {
        let addr: Address = SAMPLE.parse().unwrap();
        let encoded = bincode::encode_to_vec(addr, bincode::config::standard()).unwrap();
        let (decoded, _): (Address, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(decoded, addr);
    }
}
