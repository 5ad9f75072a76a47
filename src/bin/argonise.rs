//! Argonise CLI - in-place encryption of secret text files
//!
//! Command-line interface for encrypting and decrypting files as
//! AES-256-GCM envelopes keyed by a passphrase.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use argonise::cipher::CipherContext;
use argonise::envelope::{DEFAULT_WIDTH, EnvelopeCodec, EnvelopeConfig};
use argonise::error::{ArgoniseError, ErrorKind, Result};
use argonise::file_ops::{Direction, SecretFileApplier};
use argonise::passphrase::{
    KeyFilePassphraseReader, PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader,
};

#[derive(Parser)]
#[command(name = "argonise")]
#[command(version)]
#[command(about = "Passphrase-based in-place encryption of secret text files.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Read passphrase from the first non-empty line of FILE
    #[arg(long, global = true, value_name = "FILE", env = "ARGONISE_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Line width of encrypted envelopes
    #[arg(long, global = true, default_value_t = DEFAULT_WIDTH, env = "ARGONISE_WIDTH")]
    width: usize,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file
    #[command(alias = "e")]
    Encrypt {
        /// Path to the file whose contents is to be encrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the encrypted text to (defaults to the input file)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Encrypt raw bytes into a binary file instead of a text envelope
        #[arg(long)]
        binary: bool,
    },

    /// Decrypt a file
    #[command(alias = "d")]
    Decrypt {
        /// Path to the file whose contents is to be decrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the unencrypted text to (defaults to the input file)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Read envelopes written with the old fixed-nonce format
        #[arg(long)]
        legacy: bool,

        /// Decrypt a binary file written by `encrypt --binary`
        #[arg(long, conflicts_with = "legacy")]
        binary: bool,
    },

    /// Update an encrypted file with new content, while validating
    /// that the passphrase is not accidentally changed.
    #[command(alias = "u")]
    Update {
        /// Path to the file whose contents is to be encrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the existing encrypted file to replace
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Report whether a file is encrypted (exit status 0 if it is, 1 if not)
    #[command(alias = "c")]
    Check {
        /// Path to the file to inspect
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("ARGONISE_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("argonise=debug")
        } else {
            EnvFilter::new("argonise=warn")
        }
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e.chain_message());
            process::exit(exit_code(&e));
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = EnvelopeConfig::default().with_width(cli.width)?;
    let applier = SecretFileApplier::new(EnvelopeCodec::new(config));

    match &cli.command {
        Commands::Encrypt {
            input,
            output,
            binary,
        } => {
            let ctx = cipher_context(&cli)?;
            let output = output.as_deref().unwrap_or(input.as_path());
            let direction = if *binary {
                Direction::EncryptBinary
            } else {
                Direction::Encrypt
            };
            applier.apply(input, output, &ctx, direction)?;
        }
        Commands::Decrypt {
            input,
            output,
            legacy,
            binary,
        } => {
            let ctx = cipher_context(&cli)?;
            let output = output.as_deref().unwrap_or(input.as_path());
            let direction = match (*legacy, *binary) {
                (true, _) => Direction::DecryptLegacy,
                (false, true) => Direction::DecryptBinary,
                (false, false) => Direction::Decrypt,
            };
            applier.apply(input, output, &ctx, direction)?;
        }
        Commands::Update { input, output } => {
            let ctx = cipher_context(&cli)?;
            applier.update(input, output, &ctx)?;
        }
        Commands::Check { input } => {
            return report_encrypted(&applier, input);
        }
    }
    Ok(0)
}

fn report_encrypted(applier: &SecretFileApplier, path: &Path) -> Result<i32> {
    if applier.is_encrypted(path)? {
        println!("{}: encrypted", path.display());
        Ok(0)
    } else {
        println!("{}: not encrypted", path.display());
        Ok(1)
    }
}

fn cipher_context(cli: &Cli) -> Result<CipherContext> {
    let mut reader = get_passphrase_reader(cli);
    let passphrase = reader.read_passphrase()?;
    debug!(passphrase = %passphrase, "deriving key");
    CipherContext::from_passphrase(&passphrase)
}

fn get_passphrase_reader(cli: &Cli) -> Box<dyn PassphraseReader> {
    if let Some(path) = &cli.key_file {
        Box::new(KeyFilePassphraseReader::new(path))
    } else if cli.passphrase_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}

/// Distinct exit status per error kind; 1 covers errors without a kind and
/// 2 is left to clap for usage errors.
fn exit_code(err: &ArgoniseError) -> i32 {
    match err.kind {
        Some(ErrorKind::Io) => 3,
        Some(ErrorKind::Key) => 4,
        Some(ErrorKind::CipherInit) => 5,
        Some(ErrorKind::RandomSource) => 6,
        Some(ErrorKind::TruncatedInput) => 7,
        Some(ErrorKind::AuthenticationFailed) => 8,
        Some(ErrorKind::AlreadyEncrypted) => 9,
        Some(ErrorKind::NotEnvelope) => 10,
        Some(ErrorKind::Base64Decode) => 11,
        Some(ErrorKind::InvalidWidth) => 12,
        Some(ErrorKind::PassphraseUnavailable) => 13,
        Some(ErrorKind::InvalidText) => 14,
        Some(ErrorKind::Encryption) => 15,
        _ => 1,
    }
}
