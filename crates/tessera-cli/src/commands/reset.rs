//! The `tessera reset` subcommand.

use clap::Args;
use color_eyre::eyre::Result;

use crate::config::Config;

/// Arguments for `tessera reset`.
#[derive(Args)]
pub struct ResetArgs {
    /// Run identifier printed by `init`.
    #[arg(long)]
    pub run_id: String,
}

/// Execute the reset command.
pub fn execute(args: &ResetArgs, config: &Config) -> Result<()> {
    super::state_manager(config)?.reset(&args.run_id)?;
    eprintln!("run `{}` discarded", args.run_id);
    Ok(())
}
