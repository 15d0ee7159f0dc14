//! secp256k1 cryptographic operations for the Beck protocol.
//!
//! Keys are secp256k1 ECDSA; addresses are the last 20 bytes of the
//! Keccak-256 hash of the uncompressed public key body. Signatures are
//! 65-byte recoverable ECDSA (compact `r ‖ s` plus a recovery id byte),
//! so verification recovers the signer and compares addresses instead of
//! carrying a separate public-key equality check.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::fmt;

use crate::address::Address;
use crate::error::CryptoError;
use crate::types::Hash256;

/// Length of an uncompressed secp256k1 public key (`0x04` prefix + 64 bytes).
pub const UNCOMPRESSED_PUBKEY_LEN: usize = 65;

/// Length of a recoverable signature: compact `r ‖ s` plus the recovery id.
pub const SIGNATURE_LEN: usize = 65;

/// Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> Hash256 {
    Hash256(Keccak256::digest(data).into())
}

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

/// Derive the address for a 65-byte uncompressed public key: the last 20
/// bytes of the Keccak-256 hash of the key body (without the `0x04` tag).
pub fn derive_address(pubkey: &[u8]) -> Result<Address, CryptoError> {
    if pubkey.len() != UNCOMPRESSED_PUBKEY_LEN || pubkey[0] != 0x04 {
        return Err(CryptoError::InvalidPublicKey);
    }
    let digest = keccak256(&pubkey[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.as_bytes()[12..]);
    Ok(Address::from_bytes(bytes))
}

/// Recover the uncompressed public key that produced `signature` over
/// `digest`. Fails on malformed signatures.
pub fn recover(digest: &Hash256, signature: &[u8]) -> Result<[u8; 65], CryptoError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignature);
    }
    let rec_id = RecoveryId::from_i32(i32::from(signature[64]))
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig = RecoverableSignature::from_compact(&signature[..64], rec_id)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let msg = Message::from_digest(*digest.as_bytes());
    let pubkey = SECP256K1
        .recover_ecdsa(&msg, &sig)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(pubkey.serialize_uncompressed())
}

/// Recover the address of whoever signed `digest`.
pub fn recover_address(digest: &Hash256, signature: &[u8]) -> Result<Address, CryptoError> {
    let pubkey = recover(digest, signature)?;
    derive_address(&pubkey)
}

/// A secp256k1 keypair.
///
/// Use [`KeyPair::generate`] for random keys or [`KeyPair::from_secret_hex`]
/// to import an existing key. `Debug` never prints the secret.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let (secret, public) = SECP256K1.generate_keypair(&mut rand::thread_rng());
        Self { secret, public }
    }

    /// Import a keypair from a hex-encoded secret key (optional `0x` prefix).
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let body = hex_str
            .strip_prefix("0x")
            .or_else(|| hex_str.strip_prefix("0X"))
            .unwrap_or(hex_str);
        let bytes = hex::decode(body).map_err(|_| CryptoError::InvalidSecretKey)?;
        let secret =
            SecretKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        Ok(Self { secret, public })
    }

    /// Hex encoding of the secret key with a `0x` prefix. Handle with care.
    pub fn secret_hex(&self) -> String {
        format!("0x{}", hex::encode(self.secret.secret_bytes()))
    }

    /// The uncompressed 65-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 65] {
        self.public.serialize_uncompressed()
    }

    /// The address derived from this keypair's public key.
    pub fn address(&self) -> Address {
        derive_address(&self.public_key_bytes())
            .expect("serialize_uncompressed yields a well-formed key")
    }

    /// Sign a 32-byte digest, returning `r ‖ s ‖ recovery id`.
    pub fn sign_digest(&self, digest: &Hash256) -> [u8; 65] {
        let msg = Message::from_digest(*digest.as_bytes());
        let sig = SECP256K1.sign_ecdsa_recoverable(&msg, &self.secret);
        let (rec_id, compact) = sig.serialize_compact();
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&compact);
        out[64] = rec_id.to_i32() as u8;
        out
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
