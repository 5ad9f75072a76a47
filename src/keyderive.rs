//! Passphrase to key derivation
//!
//! The key is a single SHA-256 digest of the passphrase bytes. There is no
//! salt and no stretching, so brute-force resistance is exactly the
//! passphrase's entropy. A slow, salted KDF can be swapped in through
//! [`KeyDeriver`] without changing callers.

use crate::error::{ArgoniseError, ErrorCategory, ErrorKind, Result};
use crate::passphrase::PassPhrase;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Length of a key in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key, wiped from memory when dropped.
#[derive(Clone)]
pub struct Key {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl Key {
    /// Validates externally supplied key material.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            ArgoniseError::with_kind(
                ErrorCategory::User,
                ErrorKind::Key,
                format!(
                    "invalid key length {}; the key must be {} bytes (256 bits)",
                    bytes.len(),
                    KEY_LEN
                ),
            )
        })?;
        Ok(Self::from_array(bytes))
    }

    fn from_array(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Generates a random key from the operating system's secure random source.
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.try_fill_bytes(&mut bytes[..]).map_err(|e| {
            ArgoniseError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::RandomSource,
                "failed to generate random key",
                e,
            )
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// Turns a passphrase into a key.
pub trait KeyDeriver {
    fn derive(&self, passphrase: &PassPhrase) -> Key;
}

/// Single-pass SHA-256 derivation, compatible with existing envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Deriver;

impl KeyDeriver for Sha256Deriver {
    fn derive(&self, passphrase: &PassPhrase) -> Key {
        derive(passphrase)
    }
}

/// Derive a 32-byte key from a passphrase with one SHA-256 pass.
pub fn derive(passphrase: &PassPhrase) -> Key {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(&digest);
    Key::from_array(bytes)
}
