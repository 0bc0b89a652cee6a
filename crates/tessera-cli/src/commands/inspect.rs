//! The `tessera inspect` subcommand.
//!
//! Displays a signed attestation in human-readable format.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use tessera_verify::extract;
use tessera_verify::inspect;

/// Arguments for `tessera inspect`.
#[derive(Args)]
pub struct InspectArgs {
    /// Path to the envelope JSON file.
    pub envelope: PathBuf,

    /// Show all subjects, materials, and captured environment.
    #[arg(long)]
    pub detailed: bool,

    /// Output the extracted predicate as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the inspect command.
pub fn execute(args: &InspectArgs) -> Result<()> {
    let envelope = extract::read_envelope(&args.envelope)?;

    if args.json {
        let predicate = extract::extract(&envelope)?;
        let output = serde_json::json!({
            "summary": inspect::summarize(&envelope)?,
            "predicate": predicate,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if args.detailed {
        print!("{}", inspect::format_detailed(&envelope)?);
    } else {
        let summary = inspect::summarize(&envelope)?;
        print!("{}", inspect::format_summary(&summary));
    }

    Ok(())
}
