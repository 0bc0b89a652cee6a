//! The `tessera push` subcommand.
//!
//! Renders a complete run into an in-toto statement, signs it into a
//! DSSE envelope and writes the envelope out.

use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use tessera_craft::render::{PredicateVersion, RenderOptions, render};
use tessera_craft::signer::{LocalSigner, sign_statement};

use crate::config::Config;

/// Arguments for `tessera push`.
#[derive(Args)]
pub struct PushArgs {
    /// Run identifier printed by `init`.
    #[arg(long)]
    pub run_id: String,

    /// Write the envelope here instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Predicate schema: `v0.2` or `v1`.
    #[arg(long)]
    pub predicate_version: Option<PredicateVersion>,

    /// Signing key (PKCS#8 PEM; generated if absent).
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Keep the crafting state after a successful push.
    #[arg(long)]
    pub keep_state: bool,
}

/// Execute the push command.
pub async fn execute(args: PushArgs, config: &Config) -> Result<()> {
    let manager = super::state_manager(config)?;
    let (state, _) = manager.load(&args.run_id)?;
    state.validate_complete()?;

    let version = args
        .predicate_version
        .unwrap_or_else(|| config.predicate_version());
    let options = RenderOptions {
        builder_id: config.builder_id(),
        finished_at: Some(Utc::now()),
    };
    let statement = render(&state, version, &options)?;

    let key_path = args.key.unwrap_or_else(|| config.signing_key());
    let signer = LocalSigner::load_or_generate(&key_path)?;
    let envelope = sign_statement(&statement, &signer).await?;
    let json = envelope.to_json()?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &json)
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            eprintln!("attestation written to {}", path.display());
        }
        None => println!("{json}"),
    }

    if !args.keep_state {
        manager.reset(&args.run_id)?;
    }

    tracing::info!(
        run_id = %args.run_id,
        predicate_version = %version,
        keyid = signer.keyid(),
        "attestation pushed"
    );
    Ok(())
}
