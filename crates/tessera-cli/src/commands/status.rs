//! The `tessera status` subcommand.

use std::fmt::Write;

use clap::Args;
use color_eyre::eyre::Result;
use tessera_craft::error::CraftError;
use tessera_craft::state::CraftingState;

use crate::config::Config;

/// Arguments for `tessera status`.
#[derive(Args)]
pub struct StatusArgs {
    /// Run identifier printed by `init`.
    #[arg(long)]
    pub run_id: String,

    /// Print the raw crafting state as JSON.
    #[arg(long)]
    pub json: bool,
}

fn format_status(state: &CraftingState, digest: &str) -> Result<String> {
    let attestation = &state.attestation;
    let workflow = &attestation.workflow;
    let mut out = String::new();
    let _ = writeln!(out, "Run:        {}", workflow.run_id);
    let _ = writeln!(out, "Workflow:   {}/{}", workflow.project, workflow.name);
    let _ = writeln!(out, "Runner:     {}", attestation.runner_type);
    let _ = writeln!(out, "Started:    {}", attestation.initialized_at.to_rfc3339());
    if let Some(commit) = &attestation.git_commit {
        let _ = writeln!(out, "Git HEAD:   {}", commit.hash);
    }
    let _ = writeln!(out, "State:      {digest}");

    let _ = writeln!(out);
    let _ = writeln!(out, "Materials:");
    for m in state.normalized_materials()? {
        let marker = if m.is_output { " (output)" } else { "" };
        let _ = writeln!(out, "  {} [{}] {}{marker}", m.name, m.material_type, m.value);
    }
    for expected in &state.input_schema.expected_materials {
        if !attestation.materials.contains_key(&expected.name) {
            let note = if expected.optional { "optional" } else { "required" };
            let _ = writeln!(out, "  {} (missing, {note})", expected.name);
        }
    }

    let _ = writeln!(out);
    match state.validate_complete() {
        Ok(()) => {
            let _ = writeln!(out, "Ready to push.");
        }
        Err(CraftError::MissingMaterials { missing }) => {
            let _ = writeln!(out, "Not ready: missing {}", missing.join(", "));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(out)
}

/// Execute the status command.
pub fn execute(args: &StatusArgs, config: &Config) -> Result<()> {
    let manager = super::state_manager(config)?;
    let (state, digest) = manager.load(&args.run_id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print!("{}", format_status(&state, &digest)?);
    }
    Ok(())
}
