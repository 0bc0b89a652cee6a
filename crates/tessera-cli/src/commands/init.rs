//! The `tessera init` subcommand.
//!
//! Creates the crafting state of a new run and prints its run id.

use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use color_eyre::eyre::Result;
use tessera_craft::state::{CraftingState, InputSchema, RunnerType, WorkflowMeta};
use tessera_craft::vcs;

use crate::config::Config;

/// Arguments for `tessera init`.
#[derive(Args)]
pub struct InitArgs {
    /// Workflow name.
    #[arg(long)]
    pub workflow: String,

    /// Project the workflow belongs to.
    #[arg(long)]
    pub project: String,

    /// Owning team.
    #[arg(long)]
    pub team: Option<String>,

    /// Owning organization.
    #[arg(long)]
    pub organization: Option<String>,

    /// Run identifier (generated when omitted).
    #[arg(long)]
    pub run_id: Option<String>,

    /// Contract file (TOML or JSON) declaring the expected materials.
    #[arg(long, value_name = "PATH")]
    pub contract: Option<PathBuf>,

    /// Contract name recorded in the attestation.
    #[arg(long)]
    pub contract_name: Option<String>,

    /// Contract revision recorded in the attestation.
    #[arg(long)]
    pub contract_revision: Option<u32>,

    /// Run-level annotation (repeatable).
    #[arg(long = "annotation", value_name = "KEY=VALUE")]
    pub annotations: Vec<String>,

    /// Directory whose git HEAD is recorded.
    #[arg(long, value_name = "PATH", default_value = ".")]
    pub project_dir: PathBuf,

    /// Do not record the git HEAD.
    #[arg(long)]
    pub no_git: bool,

    /// Replace existing state for the same run id.
    #[arg(long)]
    pub force: bool,
}

fn generate_run_id() -> String {
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        std::process::id()
    )
}

/// Execute the init command.
pub fn execute(args: InitArgs, config: &Config) -> Result<()> {
    let input_schema = match &args.contract {
        Some(path) => InputSchema::from_file(path)?,
        None => InputSchema::default(),
    };

    let contract_name = args.contract_name.or_else(|| {
        args.contract
            .as_deref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
    });

    let workflow = WorkflowMeta {
        name: args.workflow,
        project: args.project,
        team: args.team,
        organization: args.organization,
        run_id: args.run_id.unwrap_or_else(generate_run_id),
        contract_name,
        contract_revision: args.contract_revision,
    };

    let (runner_type, runner_url) = RunnerType::detect(|k| std::env::var(k).ok());
    let mut state = CraftingState::new(input_schema, workflow, Utc::now())
        .with_runner(runner_type, runner_url);

    if !args.no_git {
        match vcs::capture(&args.project_dir) {
            Ok(commit) => state = state.with_git_commit(commit),
            Err(e) => tracing::info!(error = %e, "not recording git HEAD"),
        }
    }

    state.capture_env_vars(|k| std::env::var(k).ok())?;
    state.attestation.annotations = super::parse_pairs(&args.annotations)?;

    let manager = super::state_manager(config)?;
    manager.init(&state, args.force)?;

    tracing::info!(
        run_id = state.run_id(),
        runner = %runner_type,
        "crafting started"
    );
    println!("{}", state.run_id());
    Ok(())
}
