//! The `tessera verify` subcommand.
//!
//! Verifies a signed attestation's signature, predicate and digests.

use std::path::PathBuf;
use std::process;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use tessera_craft::render::PredicateVersion;
use tessera_craft::signer::LocalSigner;
use tessera_verify::{PublicKey, VerificationOutcome, Verifier, VerifyConfig};

use crate::config::Config;

/// Arguments for `tessera verify`.
#[derive(Args)]
pub struct VerifyArgs {
    /// Path to the envelope JSON file.
    pub envelope: PathBuf,

    /// Verify against this SPKI PEM public key. Defaults to the public
    /// half of the configured signing key, if it exists.
    #[arg(long, value_name = "PATH")]
    pub public_key: Option<PathBuf>,

    /// Require this predicate schema: `v0.2` or `v1`.
    #[arg(long)]
    pub predicate_version: Option<PredicateVersion>,

    /// Re-hash output files and verify digests against files on disk.
    #[arg(long)]
    pub check_files: bool,

    /// Base directory for resolving output file paths.
    #[arg(long, value_name = "PATH")]
    pub base_dir: Option<PathBuf>,

    /// Output results as JSON.
    #[arg(long)]
    pub json: bool,
}

fn resolve_public_key(args: &VerifyArgs, config: &Config) -> Result<Option<PublicKey>> {
    if let Some(path) = &args.public_key {
        let pem = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read public key {}", path.display()))?;
        return Ok(Some(PublicKey::from_pem(&pem)?));
    }

    let key_path = config.signing_key();
    if !key_path.exists() {
        tracing::debug!(path = %key_path.display(), "no signing key, signature check skipped");
        return Ok(None);
    }
    let pem = std::fs::read_to_string(&key_path)
        .wrap_err_with(|| format!("failed to read signing key {}", key_path.display()))?;
    let signer = LocalSigner::from_pem(&pem)?;
    Ok(Some(PublicKey::from_pem(&signer.public_key_pem())?))
}

/// Execute the verify command.
pub fn execute(args: &VerifyArgs, config: &Config) -> Result<()> {
    let public_key = resolve_public_key(args, config)?;

    let check_files_base = if args.check_files {
        Some(args.base_dir.clone().unwrap_or_else(|| PathBuf::from(".")))
    } else {
        args.base_dir.clone()
    };

    let verifier = Verifier::new(VerifyConfig {
        public_key,
        check_files_base,
        expected_predicate_type: args
            .predicate_version
            .map(|v| v.predicate_type().to_owned()),
    });
    let report = verifier.verify_file(&args.envelope)?;

    if args.json {
        let json_report = serde_json::json!({
            "passed": report.passed,
            "outcomes": report.outcomes,
        });
        println!("{}", serde_json::to_string_pretty(&json_report)?);
    } else {
        for outcome in &report.outcomes {
            let icon = match outcome {
                VerificationOutcome::Pass(_) => "PASS",
                VerificationOutcome::Fail(_) => "FAIL",
                VerificationOutcome::Skip(_) => "SKIP",
            };
            println!("[{icon}] {}", outcome.message());
        }

        println!();
        if report.passed {
            println!("Verification PASSED");
        } else {
            println!("Verification FAILED");
        }
    }

    if !report.passed {
        process::exit(1);
    }

    Ok(())
}
