//! Authenticated encryption of byte payloads using AES-256-GCM
//!
//! The binary format is:
//! - nonce: 12 bytes, freshly random for every encryption
//! - sealed box: variable length (ciphertext followed by the 16-byte GCM tag)
//!
//! No associated data is authenticated.

use crate::error::{ArgoniseError, ErrorCategory, ErrorKind, Result};
use crate::keyderive::{self, Key, KeyDeriver};
use crate::passphrase::PassPhrase;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use tracing::trace;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Nonce that early envelopes were all sealed under, with no nonce prefix
/// in the body. Only ever used for decryption.
const LEGACY_NONCE: [u8; NONCE_LEN] = [
    0x26, 0x7e, 0x67, 0x04, 0xee, 0x7f, 0x13, 0x29, 0x9e, 0x6e, 0x50, 0x85,
];

/// A key bound to an AES-256-GCM instance.
///
/// Encryption and decryption take `&self` and may be repeated freely.
/// [`CipherContext::replace_key`] needs `&mut self`, so it can never run
/// concurrently with either.
#[derive(Clone)]
pub struct CipherContext {
    aead: Aes256Gcm,
}

impl CipherContext {
    pub fn new(key: &Key) -> Result<Self> {
        let aead = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| {
            ArgoniseError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::CipherInit,
                format!("failed to initialise AES-256-GCM: {}", e),
            )
        })?;
        Ok(Self { aead })
    }

    /// Builds a context from raw key material, which must be exactly 32 bytes.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        Self::new(&Key::from_slice(key)?)
    }

    /// Derives the key from `passphrase` with single-pass SHA-256.
    pub fn from_passphrase(passphrase: &PassPhrase) -> Result<Self> {
        Self::new(&keyderive::derive(passphrase))
    }

    /// Derives the key from `passphrase` with the given deriver.
    pub fn with_deriver(deriver: &dyn KeyDeriver, passphrase: &PassPhrase) -> Result<Self> {
        Self::new(&deriver.derive(passphrase))
    }

    pub fn nonce_size(&self) -> usize {
        NONCE_LEN
    }

    /// Swaps in a new key.
    ///
    /// The new AES-GCM state is fully built before the swap, so on error the
    /// context keeps working with its previous key.
    pub fn replace_key(&mut self, key: &[u8]) -> Result<()> {
        let replacement = Self::from_key_bytes(key)?;
        *self = replacement;
        Ok(())
    }

    /// Encrypt plaintext under a random nonce
    ///
    /// Returns the binary format: nonce(12) + sealedbox(variable)
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.try_fill_bytes(&mut nonce).map_err(|e| {
            ArgoniseError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::RandomSource,
                "failed to generate nonce",
                e,
            )
        })?;

        self.encrypt_with_nonce(plaintext, &nonce)
    }

    /// Encrypt plaintext under the provided nonce
    ///
    /// This function is ONLY for testing purposes to generate deterministic output.
    /// NEVER use this in production - always use `encrypt()` which generates a random nonce.
    pub fn encrypt_with_nonce(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        trace!(plaintext_len = plaintext.len(), "encrypting");

        let sealed_box = self
            .aead
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| {
                ArgoniseError::with_kind(
                    ErrorCategory::Internal,
                    ErrorKind::Encryption,
                    format!("encryption failed: {}", e),
                )
            })?;

        let mut output = Vec::with_capacity(NONCE_LEN + sealed_box.len());
        output.extend_from_slice(nonce);
        output.extend_from_slice(&sealed_box);

        trace!(ciphertext_len = output.len(), "encrypted");
        Ok(output)
    }

    /// Decrypt a nonce-prefixed ciphertext
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        trace!(ciphertext_len = ciphertext.len(), "decrypting");

        if ciphertext.len() < NONCE_LEN {
            return Err(ArgoniseError::with_kind(
                ErrorCategory::User,
                ErrorKind::TruncatedInput,
                "input likely truncated while reading nonce",
            ));
        }
        let (nonce, sealed_box) = ciphertext.split_at(NONCE_LEN);

        self.open(nonce, sealed_box)
    }

    /// Decrypt a sealed box produced under the historical fixed nonce.
    ///
    /// Such bodies carry no nonce prefix. There is intentionally no
    /// matching encrypt.
    pub fn decrypt_legacy(&self, sealed_box: &[u8]) -> Result<Vec<u8>> {
        trace!(ciphertext_len = sealed_box.len(), "decrypting legacy");
        self.open(&LEGACY_NONCE, sealed_box)
    }

    fn open(&self, nonce: &[u8], sealed_box: &[u8]) -> Result<Vec<u8>> {
        self.aead
            .decrypt(Nonce::from_slice(nonce), sealed_box)
            .map_err(|_| {
                ArgoniseError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::AuthenticationFailed,
                    "corrupt input, tampered-with data, or bad passphrase",
                )
            })
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("algorithm", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}
