//! The `tessera public-key` subcommand.
//!
//! Prints the SPKI PEM that verifiers need to check attestations signed
//! with the local key.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use tessera_craft::signer::LocalSigner;

use crate::config::Config;

/// Arguments for `tessera public-key`.
#[derive(Args)]
pub struct PublicKeyArgs {
    /// Signing key (PKCS#8 PEM; generated if absent).
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Write the PEM here instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Execute the public-key command.
pub fn execute(args: &PublicKeyArgs, config: &Config) -> Result<()> {
    let key_path = args.key.clone().unwrap_or_else(|| config.signing_key());
    let signer = LocalSigner::load_or_generate(&key_path)?;
    let pem = signer.public_key_pem();

    match &args.output {
        Some(path) => std::fs::write(path, &pem)
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{pem}"),
    }
    eprintln!("keyid: {}", signer.keyid());
    Ok(())
}
