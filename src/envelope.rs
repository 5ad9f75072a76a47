//! Text envelope framing for ciphertext
//!
//! An envelope is a block of fixed-width lines that can sit in a text file
//! and survive editors and version control:
//!
//! ```text
//! --| argon |---------------------------------------------------------------------
//! <standard padded base64 of nonce + sealed box, 80 characters per line>
//! --| end |-----------------------------------------------------------------------
//! ```
//!
//! Every line, including the footer, ends in `\n`.

use crate::cipher::{CipherContext, NONCE_LEN};
use crate::error::{ArgoniseError, ErrorCategory, ErrorKind, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{trace, warn};

/// Sentinel that opens every envelope
pub const HEADER: &str = "--| argon |";

/// Sentinel that closes every envelope
pub const FOOTER: &str = "--| end |";

/// Character used to pad the sentinels out to the line width
pub const FILL: char = '-';

/// Default line width of envelopes
pub const DEFAULT_WIDTH: usize = 80;

/// Widest line an envelope may be configured with
pub const MAX_WIDTH: usize = 1 << 16;

/// Formatting parameters for envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeConfig {
    header: String,
    footer: String,
    fill: char,
    width: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            header: HEADER.to_string(),
            footer: FOOTER.to_string(),
            fill: FILL,
            width: DEFAULT_WIDTH,
        }
    }
}

impl EnvelopeConfig {
    pub fn new(
        header: impl Into<String>,
        footer: impl Into<String>,
        fill: char,
        width: usize,
    ) -> Result<Self> {
        Self {
            header: header.into(),
            footer: footer.into(),
            fill,
            width: 0,
        }
        .with_width(width)
    }

    /// Returns the config with a different line width.
    ///
    /// The width must lie in `1..=MAX_WIDTH`.
    pub fn with_width(mut self, width: usize) -> Result<Self> {
        if width == 0 || width > MAX_WIDTH {
            return Err(invalid_width(
                ErrorCategory::User,
                format!(
                    "line width must be between 1 and {}, got {}",
                    MAX_WIDTH, width
                ),
            ));
        }
        self.width = width;
        Ok(self)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// The header sentinel padded to the line width.
    pub fn header_line(&self) -> String {
        pad(&self.header, self.width, self.fill)
    }

    /// The footer sentinel padded to the line width.
    pub fn footer_line(&self) -> String {
        pad(&self.footer, self.width, self.fill)
    }

    /// Header without its closing `|`, which is all decoding insists on.
    fn header_prefix(&self) -> &str {
        self.header.trim_end_matches('|')
    }
}

/// Encodes plaintext into envelopes and back.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    config: EnvelopeConfig,
}

impl EnvelopeCodec {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Whether `text` opens with an envelope header.
    pub fn is_envelope(&self, text: &str) -> bool {
        first_line(text).starts_with(self.config.header_prefix())
    }

    /// Encrypt `plaintext` and frame it as an envelope.
    pub fn encode(&self, plaintext: &str, ctx: &CipherContext) -> Result<String> {
        self.check_not_envelope(plaintext)?;
        let ciphertext = ctx.encrypt(plaintext.as_bytes())?;
        Ok(self.frame(&ciphertext))
    }

    /// Encode under the provided nonce
    ///
    /// This function is ONLY for testing purposes to generate deterministic output.
    /// NEVER use this in production - always use `encode()`.
    pub fn encode_with_nonce(
        &self,
        plaintext: &str,
        ctx: &CipherContext,
        nonce: &[u8; NONCE_LEN],
    ) -> Result<String> {
        self.check_not_envelope(plaintext)?;
        let ciphertext = ctx.encrypt_with_nonce(plaintext.as_bytes(), nonce)?;
        Ok(self.frame(&ciphertext))
    }

    /// Unframe and decrypt an envelope.
    pub fn decode(&self, envelope: &str, ctx: &CipherContext) -> Result<String> {
        let ciphertext = self.unframe(envelope)?;
        let plaintext = ctx.decrypt(&ciphertext)?;
        into_text(plaintext)
    }

    /// Unframe and decrypt an envelope written under the historical fixed nonce.
    pub fn decode_legacy(&self, envelope: &str, ctx: &CipherContext) -> Result<String> {
        warn!("decoding with the legacy fixed-nonce format; re-encrypt to upgrade");
        let sealed_box = self.unframe(envelope)?;
        let plaintext = ctx.decrypt_legacy(&sealed_box)?;
        into_text(plaintext)
    }

    // Envelopes written at any width are refused, not only at ours.
    fn check_not_envelope(&self, plaintext: &str) -> Result<()> {
        if self.has_header_sentinel(plaintext) {
            return Err(ArgoniseError::with_kind(
                ErrorCategory::User,
                ErrorKind::AlreadyEncrypted,
                "text is already encrypted",
            ));
        }
        Ok(())
    }

    /// Whether the first line is the header sentinel followed by nothing but fill.
    fn has_header_sentinel(&self, text: &str) -> bool {
        first_line(text)
            .trim_end_matches('\r')
            .strip_prefix(self.config.header.as_str())
            .is_some_and(|rest| rest.chars().all(|c| c == self.config.fill))
    }

    fn frame(&self, ciphertext: &[u8]) -> String {
        let encoded = STANDARD.encode(ciphertext);
        let body = split_width(&encoded, self.config.width);

        let capacity = self
            .config
            .width
            .checked_add(1)
            .and_then(|line_len| line_len.checked_mul(body.len() + 2))
            .unwrap_or(encoded.len());
        let mut out = String::with_capacity(capacity);
        out.push_str(&self.config.header_line());
        out.push('\n');
        for line in body {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&self.config.footer_line());
        out.push('\n');

        trace!(
            ciphertext_len = ciphertext.len(),
            envelope_len = out.len(),
            "framed envelope"
        );
        out
    }

    fn unframe(&self, envelope: &str) -> Result<Vec<u8>> {
        if !self.is_envelope(envelope) {
            return Err(ArgoniseError::with_kind(
                ErrorCategory::User,
                ErrorKind::NotEnvelope,
                "text does not appear to be encrypted",
            ));
        }

        // The trailing newline after the footer leaves an empty final element,
        // so the body sits between the header and the last two elements.
        let lines: Vec<&str> = envelope.split('\n').collect();
        if lines.len() < 3 {
            return Err(ArgoniseError::with_kind(
                ErrorCategory::User,
                ErrorKind::NotEnvelope,
                "envelope is missing its body or footer",
            ));
        }
        let body: String = lines[1..lines.len() - 2]
            .iter()
            .map(|line| line.trim_end_matches('\r'))
            .collect();

        let ciphertext = STANDARD.decode(body.as_bytes()).map_err(|e| {
            ArgoniseError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Base64Decode,
                format!("base64 decoding failed: {}", e),
                e,
            )
        })?;
        trace!(ciphertext_len = ciphertext.len(), "unframed envelope");
        Ok(ciphertext)
    }
}

/// Right-pad `text` with `fill` to exactly `width` characters.
///
/// Text that is already at least `width` characters long is returned as is.
pub fn pad(text: &str, width: usize, fill: char) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let mut padded = String::with_capacity(text.len() + (width - len) * fill.len_utf8());
    padded.push_str(text);
    padded.extend(std::iter::repeat_n(fill, width - len));
    padded
}

/// Split `text` into consecutive chunks of `width` characters.
///
/// The last chunk holds whatever remains and may be shorter. Empty input
/// yields no chunks.
pub fn split(text: &str, width: isize) -> Result<Vec<&str>> {
    if width <= 0 {
        return Err(invalid_width(
            ErrorCategory::Internal,
            format!("line width must be greater than zero, got {}", width),
        ));
    }
    Ok(split_width(text, width as usize))
}

fn split_width(text: &str, width: usize) -> Vec<&str> {
    let mut chunks = Vec::with_capacity(text.len() / width + 1);
    let mut rest = text;
    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(width)
            .map_or(rest.len(), |(idx, _)| idx);
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

fn first_line(text: &str) -> &str {
    text.split('\n').next().unwrap_or(text)
}

fn invalid_width(category: ErrorCategory, msg: String) -> ArgoniseError {
    ArgoniseError::with_kind(category, ErrorKind::InvalidWidth, msg)
}

// The conversion error is not attached as a source: it holds the plaintext.
fn into_text(plaintext: Vec<u8>) -> Result<String> {
    String::from_utf8(plaintext).map_err(|_| {
        ArgoniseError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidText,
            "decrypted data is not valid UTF-8 text",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passphrase::PassPhrase;
    use proptest::prelude::*;

    fn context(passphrase: &str) -> CipherContext {
        CipherContext::from_passphrase(&PassPhrase::new(passphrase)).unwrap()
    }

    fn body_lines(envelope: &str) -> Vec<&str> {
        let lines: Vec<&str> = envelope.lines().collect();
        lines[1..lines.len() - 1].to_vec()
    }

    #[test]
    fn test_concrete_scenario() {
        let codec = EnvelopeCodec::default();
        let ctx = context("correct horse battery staple");

        let envelope = codec.encode("db_password=hunter2", &ctx).unwrap();
        let lines: Vec<&str> = envelope.lines().collect();

        let header = format!("--| argon |{}", "-".repeat(69));
        let footer = format!("--| end |{}", "-".repeat(71));
        assert_eq!(lines.first(), Some(&header.as_str()));
        assert_eq!(lines.last(), Some(&footer.as_str()));
        assert_eq!(header.len(), 80);
        assert_eq!(footer.len(), 80);
        assert!(envelope.ends_with(&format!("{}\n", footer)));

        assert_eq!(codec.decode(&envelope, &ctx).unwrap(), "db_password=hunter2");

        let err = codec
            .decode(&envelope, &context("wrong"))
            .expect_err("expected authentication failure");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_body_lines_are_wrapped_at_width() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let plaintext = "x".repeat(500);

        let envelope = codec.encode(&plaintext, &ctx).unwrap();
        let body = body_lines(&envelope);

        assert!(body.len() > 1);
        for line in &body[..body.len() - 1] {
            assert_eq!(line.len(), DEFAULT_WIDTH);
        }
        assert!(body.last().unwrap().len() <= DEFAULT_WIDTH);
        assert_eq!(codec.decode(&envelope, &ctx).unwrap(), plaintext);
    }

    #[test]
    fn test_custom_width() {
        let codec = EnvelopeCodec::new(EnvelopeConfig::default().with_width(16).unwrap());
        let ctx = context("test");

        let envelope = codec.encode("short secret", &ctx).unwrap();
        let lines: Vec<&str> = envelope.lines().collect();
        assert_eq!(lines[0], "--| argon |-----");
        assert_eq!(lines[lines.len() - 1], "--| end |-------");
        for line in body_lines(&envelope) {
            assert!(line.len() <= 16);
        }
        assert_eq!(codec.decode(&envelope, &ctx).unwrap(), "short secret");
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let envelope = codec.encode("", &ctx).unwrap();
        assert_eq!(envelope.lines().count(), 3);
        assert_eq!(codec.decode(&envelope, &ctx).unwrap(), "");
    }

    #[test]
    fn test_multiline_plaintext_roundtrip() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let plaintext = "user: admin\npassword: s3cr3t\n\nünïcødé: ✓\n";
        let envelope = codec.encode(plaintext, &ctx).unwrap();
        assert_eq!(codec.decode(&envelope, &ctx).unwrap(), plaintext);
    }

    #[test]
    fn test_encode_rejects_envelope() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let envelope = codec.encode("secret", &ctx).unwrap();

        let err = codec
            .encode(&envelope, &ctx)
            .expect_err("expected double encryption to be refused");
        assert_eq!(err.kind, Some(ErrorKind::AlreadyEncrypted));
    }

    #[test]
    fn test_encode_rejects_envelope_of_other_width() {
        let narrow = EnvelopeCodec::new(EnvelopeConfig::default().with_width(40).unwrap());
        let wide = EnvelopeCodec::default();
        let ctx = context("test");

        let envelope = narrow.encode("secret", &ctx).unwrap();
        assert!(wide.is_envelope(&envelope));
        assert_eq!(wide.decode(&envelope, &ctx).unwrap(), "secret");

        let err = wide
            .encode(&envelope, &ctx)
            .expect_err("expected double encryption to be refused");
        assert_eq!(err.kind, Some(ErrorKind::AlreadyEncrypted));

        let crlf = envelope.replace('\n', "\r\n");
        let err = narrow.encode(&crlf, &ctx).expect_err("expected refusal");
        assert_eq!(err.kind, Some(ErrorKind::AlreadyEncrypted));
    }

    #[test]
    fn test_encode_accepts_text_after_header_sentinel() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let plaintext = "--| argon | notes on the envelope format\n";

        let envelope = codec.encode(plaintext, &ctx).unwrap();
        assert_eq!(codec.decode(&envelope, &ctx).unwrap(), plaintext);
    }

    #[test]
    fn test_decode_rejects_plaintext() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");

        for text in ["", "db_password=hunter2\n", "--| end |---\n", " --| argon |\n"] {
            let err = codec
                .decode(text, &ctx)
                .expect_err("expected non-envelope error");
            assert_eq!(err.kind, Some(ErrorKind::NotEnvelope), "input {:?}", text);
        }
    }

    #[test]
    fn test_decode_header_only() {
        let codec = EnvelopeCodec::default();
        let err = codec
            .decode("--| argon |---", &context("test"))
            .expect_err("expected non-envelope error");
        assert_eq!(err.kind, Some(ErrorKind::NotEnvelope));
    }

    #[test]
    fn test_decode_bad_base64() {
        let codec = EnvelopeCodec::default();
        let envelope = format!(
            "{}\nnot$base64!!\n{}\n",
            codec.config().header_line(),
            codec.config().footer_line()
        );
        let err = codec
            .decode(&envelope, &context("test"))
            .expect_err("expected base64 error");
        assert_eq!(err.kind, Some(ErrorKind::Base64Decode));
    }

    #[test]
    fn test_decode_short_body_is_truncated() {
        let codec = EnvelopeCodec::default();
        let envelope = format!(
            "{}\n{}\n{}\n",
            codec.config().header_line(),
            STANDARD.encode([0u8; 5]),
            codec.config().footer_line()
        );
        let err = codec
            .decode(&envelope, &context("test"))
            .expect_err("expected truncated input");
        assert_eq!(err.kind, Some(ErrorKind::TruncatedInput));
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let envelope = codec.encode(&"y".repeat(200), &ctx).unwrap();
        let crlf = envelope.replace('\n', "\r\n");
        assert_eq!(codec.decode(&crlf, &ctx).unwrap(), "y".repeat(200));
    }

    #[test]
    fn test_every_flipped_ciphertext_byte_fails_authentication() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let envelope = codec.encode("db_password=hunter2", &ctx).unwrap();
        let ciphertext = STANDARD.decode(body_lines(&envelope).concat()).unwrap();

        for i in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x80;
            let tampered_envelope = codec.frame(&tampered);
            let err = codec
                .decode(&tampered_envelope, &ctx)
                .expect_err("tampering must be detected");
            assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed), "byte {}", i);
        }
    }

    #[test]
    fn test_edited_body_character_fails_authentication() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let envelope = codec.encode("db_password=hunter2", &ctx).unwrap();
        let body = body_lines(&envelope)[0];

        // The last quad carries padding, so stay within the full quads.
        for i in 0..body.len() - 4 {
            let mut edited: Vec<u8> = body.as_bytes().to_vec();
            edited[i] = if edited[i] == b'A' { b'B' } else { b'A' };
            let edited_envelope = envelope.replacen(body, std::str::from_utf8(&edited).unwrap(), 1);
            let err = codec
                .decode(&edited_envelope, &ctx)
                .expect_err("tampering must be detected");
            assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed), "char {}", i);
        }
    }

    #[test]
    fn test_is_envelope() {
        let codec = EnvelopeCodec::default();
        let envelope = codec.encode("secret", &context("test")).unwrap();
        assert!(codec.is_envelope(&envelope));
        assert!(codec.is_envelope("--| argon |\n"));
        assert!(!codec.is_envelope("secret"));
        assert!(!codec.is_envelope(""));
    }

    #[test]
    fn test_legacy_decode() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let legacy_nonce = [
            0x26, 0x7e, 0x67, 0x04, 0xee, 0x7f, 0x13, 0x29, 0x9e, 0x6e, 0x50, 0x85,
        ];
        let prefixed = ctx.encrypt_with_nonce(b"old secret", &legacy_nonce).unwrap();
        let envelope = codec.frame(&prefixed[NONCE_LEN..]);

        assert_eq!(codec.decode_legacy(&envelope, &ctx).unwrap(), "old secret");
        assert_eq!(
            codec.decode(&envelope, &ctx).unwrap_err().kind,
            Some(ErrorKind::AuthenticationFailed)
        );
    }

    #[test]
    fn test_non_utf8_payload() {
        let codec = EnvelopeCodec::default();
        let ctx = context("test");
        let envelope = codec.frame(&ctx.encrypt(&[0xff, 0xfe]).unwrap());
        let err = codec.decode(&envelope, &ctx).expect_err("expected text error");
        assert_eq!(err.kind, Some(ErrorKind::InvalidText));
    }

    #[test]
    fn test_pad() {
        assert_eq!(pad("abc", 6, '-'), "abc---");
        assert_eq!(pad("abcdef", 3, '-'), "abcdef");
        assert_eq!(pad("abc", 3, '-'), "abc");
        assert_eq!(pad("", 2, '='), "==");
        assert_eq!(pad("é", 3, '·'), "é··");
    }

    #[test]
    fn test_split() {
        assert_eq!(split("abcdefg", 3).unwrap(), vec!["abc", "def", "g"]);
        assert_eq!(split("abcdef", 3).unwrap(), vec!["abc", "def"]);
        assert_eq!(split("ab", 5).unwrap(), vec!["ab"]);
        assert!(split("", 4).unwrap().is_empty());
        assert_eq!(split("ééé", 2).unwrap(), vec!["éé", "é"]);
    }

    #[test]
    fn test_split_invalid_width() {
        for width in [0, -1, isize::MIN] {
            let err = split("abc", width).expect_err("expected width error");
            assert_eq!(err.kind, Some(ErrorKind::InvalidWidth));
        }
    }

    #[test]
    fn test_config_rejects_zero_width() {
        let err = EnvelopeConfig::default()
            .with_width(0)
            .expect_err("expected width error");
        assert_eq!(err.kind, Some(ErrorKind::InvalidWidth));
        assert!(EnvelopeConfig::new(HEADER, FOOTER, FILL, 0).is_err());
    }

    #[test]
    fn test_config_rejects_oversized_width() {
        for width in [MAX_WIDTH + 1, 1_000_000_000_000, usize::MAX] {
            let err = EnvelopeConfig::default()
                .with_width(width)
                .expect_err("expected width error");
            assert_eq!(err.kind, Some(ErrorKind::InvalidWidth));
            assert_eq!(err.category, ErrorCategory::User);
        }

        let codec = EnvelopeCodec::new(EnvelopeConfig::default().with_width(MAX_WIDTH).unwrap());
        let ctx = context("test");
        let envelope = codec.encode("s", &ctx).unwrap();
        assert_eq!(envelope.lines().next().map(str::len), Some(MAX_WIDTH));
        assert_eq!(codec.decode(&envelope, &ctx).unwrap(), "s");
    }

    #[test]
    fn test_config_narrower_than_sentinel() {
        let config = EnvelopeConfig::new(HEADER, FOOTER, FILL, 4).unwrap();
        assert_eq!(config.header_line(), HEADER);
        assert_eq!(config.footer_line(), FOOTER);

        let codec = EnvelopeCodec::new(config);
        let ctx = context("test");
        let envelope = codec.encode("narrow", &ctx).unwrap();
        assert_eq!(codec.decode(&envelope, &ctx).unwrap(), "narrow");
    }

    proptest! {
        #[test]
        fn prop_pad_length(text in ".{0,100}", width in 0usize..120) {
            let padded = pad(&text, width, '-');
            prop_assert_eq!(padded.chars().count(), text.chars().count().max(width));
            prop_assert!(padded.starts_with(&text));
        }

        #[test]
        fn prop_split_concatenates(text in ".{0,300}", width in 1isize..100) {
            let chunks = split(&text, width).unwrap();
            prop_assert_eq!(chunks.concat(), text.clone());
            if let Some((last, init)) = chunks.split_last() {
                for chunk in init {
                    prop_assert_eq!(chunk.chars().count(), width as usize);
                }
                prop_assert!(!last.is_empty());
                prop_assert!(last.chars().count() <= width as usize);
            } else {
                prop_assert!(text.is_empty());
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(plaintext in any::<String>(), width in 1usize..200) {
            let codec = EnvelopeCodec::new(EnvelopeConfig::default().with_width(width).unwrap());
            let ctx = context("property");
            let envelope = codec.encode(&plaintext, &ctx).unwrap();
            prop_assert_eq!(codec.decode(&envelope, &ctx).unwrap(), plaintext);
        }
    }
}
