//! File encryption/decryption operations
//!
//! This module reads a secret file, runs it through the envelope codec and
//! writes the result back. Binary files skip the envelope and are stored
//! as the raw `nonce || sealed box` produced by the cipher.
//!
//! Output is always produced through a tempfile in the destination
//! directory that is fsynced and renamed into place, so a failed run never
//! leaves a partial file behind, and source and destination may be the
//! same path.

use crate::cipher::CipherContext;
use crate::envelope::EnvelopeCodec;
use crate::error::{ArgoniseError, ErrorCategory, ErrorKind, Result};
use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Which way a file is transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
    /// Decrypt an envelope written under the historical fixed nonce.
    DecryptLegacy,
    /// Encrypt arbitrary bytes into a raw ciphertext file.
    EncryptBinary,
    /// Decrypt a raw ciphertext file back to its original bytes.
    DecryptBinary,
}

/// Applies the envelope codec to files.
#[derive(Debug, Clone, Default)]
pub struct SecretFileApplier {
    codec: EnvelopeCodec,
}

impl SecretFileApplier {
    pub fn new(codec: EnvelopeCodec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Transform `source` in the given direction and write the result to `dest`.
    ///
    /// `dest` receives the permission bits of `source`. Nothing is written
    /// unless encoding or decoding fully succeeds.
    pub fn apply(
        &self,
        source: &Path,
        dest: &Path,
        ctx: &CipherContext,
        direction: Direction,
    ) -> Result<()> {
        debug!(
            source = %source.display(),
            dest = %dest.display(),
            ?direction,
            "applying"
        );
        let (bytes, permissions) = read_bytes(source)?;
        let output = match direction {
            Direction::EncryptBinary => ctx
                .encrypt(&bytes)
                .map_err(|e| e.with_context("encryption failed"))?,
            Direction::DecryptBinary => ctx
                .decrypt(&bytes)
                .map_err(|e| e.with_context("failed to decrypt"))?,
            Direction::Encrypt => self
                .codec
                .encode(&into_text(source, bytes)?, ctx)
                .map_err(|e| e.with_context("encryption failed"))?
                .into_bytes(),
            Direction::Decrypt => self
                .codec
                .decode(&into_text(source, bytes)?, ctx)
                .map_err(|e| e.with_context("failed to decrypt"))?
                .into_bytes(),
            Direction::DecryptLegacy => self
                .codec
                .decode_legacy(&into_text(source, bytes)?, ctx)
                .map_err(|e| e.with_context("failed to decrypt"))?
                .into_bytes(),
        };
        write_atomic(dest, &output, permissions)
            .map_err(|e| e.with_context(format!("failed to write to {}", dest.display())))
    }

    /// Update an encrypted file with new plaintext under the same key
    ///
    /// This function:
    /// 1. Decrypts the existing envelope at `crypt_path` to validate the key
    /// 2. Reads new plaintext from `plain_path`
    /// 3. Encrypts the new plaintext
    /// 4. Atomically replaces `crypt_path`, keeping its permission bits
    ///
    /// The validation prevents accidentally re-encrypting under a different
    /// passphrase.
    pub fn update(&self, plain_path: &Path, crypt_path: &Path, ctx: &CipherContext) -> Result<()> {
        debug!(
            plain = %plain_path.display(),
            crypt = %crypt_path.display(),
            "updating"
        );
        let (envelope, permissions) = read_text(crypt_path)?;

        // Validate the key by decrypting the existing file (discard plaintext)
        self.codec
            .decode(&envelope, ctx)
            .map_err(|e| e.with_context("failed to decrypt"))?;

        let (new_plaintext, _) = read_text(plain_path)?;
        let new_envelope = self
            .codec
            .encode(&new_plaintext, ctx)
            .map_err(|e| e.with_context("failed to encrypt"))?;

        write_atomic(crypt_path, new_envelope.as_bytes(), permissions).map_err(|e| {
            e.with_context(format!("failed to write to {}", crypt_path.display()))
        })
    }

    /// Whether the file at `path` already holds an envelope.
    pub fn is_encrypted(&self, path: &Path) -> Result<bool> {
        let (text, _) = read_text(path)?;
        Ok(self.codec.is_envelope(&text))
    }
}

/// Read a regular file as UTF-8 text, along with its permissions.
fn read_text(path: &Path) -> Result<(String, Permissions)> {
    let (bytes, permissions) = read_bytes(path)?;
    Ok((into_text(path, bytes)?, permissions))
}

/// Read all bytes of a regular file, along with its permissions.
fn read_bytes(path: &Path) -> Result<(Vec<u8>, Permissions)> {
    let metadata = fs::metadata(path).map_err(|e| read_error(path, e))?;
    if metadata.is_dir() {
        return Err(ArgoniseError::with_kind(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is a directory, not a file", path.display()),
        ));
    }

    let bytes = fs::read(path).map_err(|e| read_error(path, e))?;
    Ok((bytes, metadata.permissions()))
}

// Only the Utf8Error is kept as source; it does not carry file contents.
fn into_text(path: &Path, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        ArgoniseError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is not valid UTF-8 text", path.display()),
            e.utf8_error(),
        )
    })
}

/// Write `contents` to `path` via tempfile, fsync and rename.
fn write_atomic(path: &Path, contents: &[u8], permissions: Permissions) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        ArgoniseError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to create tempfile",
            e,
        )
    })?;

    temp_file.write_all(contents).map_err(|e| {
        ArgoniseError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to write to tempfile",
            e,
        )
    })?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file.flush().map_err(|e| {
        ArgoniseError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to flush tempfile",
            e,
        )
    })?;
    temp_file.as_file().sync_all().map_err(|e| {
        ArgoniseError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to sync file prior to rename",
            e,
        )
    })?;
    temp_file.as_file().set_permissions(permissions).map_err(|e| {
        ArgoniseError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to set tempfile permissions",
            e,
        )
    })?;

    temp_file.persist(path).map_err(|e| {
        ArgoniseError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn read_error(path: &Path, err: io::Error) -> ArgoniseError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    ArgoniseError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
