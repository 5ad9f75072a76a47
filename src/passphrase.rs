//! Passphrase handling and reading
//!
//! [`PassPhrase`] owns the secret text and masks it whenever it is
//! formatted. The [`PassphraseReader`] implementations obtain one from the
//! terminal, stdin, a key file or a constant.

use crate::error::{ArgoniseError, ErrorCategory, ErrorKind, Result};
use std::fmt;
use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Character substituted for hidden passphrase characters.
const MASK_CHAR: char = '*';

/// An opaque secret string of arbitrary length and content.
///
/// The backing storage is wiped when dropped. `Display` and `Debug` only
/// ever reveal the first and last character, so `"sausages"` formats as
/// `"s******s"`.
#[derive(Clone)]
pub struct PassPhrase {
    phrase: Zeroizing<String>,
}

impl PassPhrase {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: Zeroizing::new(phrase.into()),
        }
    }

    /// The raw passphrase bytes, as fed to key derivation.
    pub fn as_bytes(&self) -> &[u8] {
        self.phrase.as_bytes()
    }

    /// The passphrase in clear. Never log or print the result.
    pub fn expose_secret(&self) -> &str {
        &self.phrase
    }

    pub fn is_empty(&self) -> bool {
        self.phrase.is_empty()
    }

    /// Masked rendering of the passphrase.
    ///
    /// Passphrases of one or two characters are masked completely, since
    /// keeping the first and last character would show them in clear.
    pub fn masked(&self) -> String {
        let count = self.phrase.chars().count();
        if count <= 2 {
            return MASK_CHAR.to_string().repeat(count);
        }
        self.phrase
            .chars()
            .enumerate()
            .map(|(i, c)| if i == 0 || i == count - 1 { c } else { MASK_CHAR })
            .collect()
    }
}

impl fmt::Display for PassPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for PassPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PassPhrase").field(&self.masked()).finish()
    }
}

impl From<&str> for PassPhrase {
    fn from(phrase: &str) -> Self {
        Self::new(phrase)
    }
}

impl From<String> for PassPhrase {
    fn from(phrase: String) -> Self {
        Self::new(phrase)
    }
}

/// Trait for reading passphrases from various sources
pub trait PassphraseReader {
    /// Read a passphrase.
    fn read_passphrase(&mut self) -> Result<PassPhrase>;
}

/// Returns a fixed passphrase (for testing)
pub struct ConstantPassphraseReader {
    passphrase: PassPhrase,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: impl Into<PassPhrase>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<PassPhrase> {
        Ok(self.passphrase.clone())
    }
}

/// Reads passphrase from any io::Read source
///
/// Everything up to EOF is the passphrase, minus a single trailing line
/// ending so that `echo secret | argonise ...` behaves as expected.
pub struct ReaderPassphraseReader {
    reader: Box<dyn Read>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self) -> Result<PassPhrase> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            ArgoniseError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        let text = utf8_passphrase(&data)?;
        let text = text
            .strip_suffix('\n')
            .map(|t| t.strip_suffix('\r').unwrap_or(t))
            .unwrap_or(text);
        Ok(PassPhrase::new(text))
    }
}

/// Reads the passphrase from a key file.
///
/// The passphrase is the first line that is non-empty after trimming
/// surrounding whitespace.
pub struct KeyFilePassphraseReader {
    path: PathBuf,
}

impl KeyFilePassphraseReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PassphraseReader for KeyFilePassphraseReader {
    fn read_passphrase(&mut self) -> Result<PassPhrase> {
        let data = Zeroizing::new(fs::read(&self.path).map_err(|e| {
            ArgoniseError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Io,
                format!("failed to read key file {}", self.path.display()),
                e,
            )
        })?);
        let text = utf8_passphrase(&data)?;
        let line = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                ArgoniseError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::PassphraseUnavailable,
                    format!("key file {} contains no passphrase", self.path.display()),
                )
            })?;
        tracing::debug!(path = %self.path.display(), "read passphrase from key file");
        Ok(PassPhrase::new(line))
    }
}

/// Reads passphrase from terminal with no echo
pub struct TerminalPassphraseReader;

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalPassphraseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    fn read_passphrase(&mut self) -> Result<PassPhrase> {
        if !io::stdin().is_terminal() {
            return Err(ArgoniseError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal - stdin is not a terminal",
            ));
        }

        io::stderr()
            .write_all(b"Passphrase (argonise): ")
            .map_err(|e| {
                ArgoniseError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to write prompt: {}", e),
                    e,
                )
            })?;
        io::stderr().flush().map_err(|e| {
            ArgoniseError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to flush prompt: {}", e),
                e,
            )
        })?;

        // Read password *without echo*
        let passphrase = rpassword::read_password().map_err(|e| {
            ArgoniseError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading passphrase: {}", e),
                e,
            )
        })?;

        Ok(PassPhrase::new(passphrase))
    }
}

/// Wraps another PassphraseReader and caches the result
///
/// Provides "at most once" semantics - the upstream reader is called
/// only on the first invocation, and subsequent calls return the cached value.
pub struct CachingPassphraseReader {
    upstream: Box<dyn PassphraseReader>,
    cached: Option<PassPhrase>,
}

impl CachingPassphraseReader {
    pub fn new(upstream: Box<dyn PassphraseReader>) -> Self {
        Self {
            upstream,
            cached: None,
        }
    }
}

impl PassphraseReader for CachingPassphraseReader {
    fn read_passphrase(&mut self) -> Result<PassPhrase> {
        if let Some(cached) = &self.cached {
            return Ok(cached.clone());
        }
        let passphrase = self.upstream.read_passphrase()?;
        self.cached = Some(passphrase.clone());
        Ok(passphrase)
    }
}

// The decode error is deliberately not attached as a source: it would
// carry the offending passphrase bytes into error output.
fn utf8_passphrase(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|_| {
        ArgoniseError::with_kind(
            ErrorCategory::User,
            ErrorKind::PassphraseUnavailable,
            "passphrase is not valid UTF-8",
        )
    })
}
