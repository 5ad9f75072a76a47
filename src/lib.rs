//! Argonise - passphrase-based in-place encryption of secret text files
//!
//! A file is replaced by a fixed-width, base64 "envelope" holding its
//! AES-256-GCM ciphertext, and can be turned back into plaintext with the
//! same passphrase.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod file_ops;
pub mod keyderive;
pub mod passphrase;
