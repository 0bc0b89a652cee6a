//! Tessera CLI: craft, sign and verify workflow attestations.
//!
//! Each step of a workflow run is a separate invocation; the crafting
//! state lives in a file store between them.

mod commands;
mod config;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::EnvFilter;

/// Tessera: attest what a workflow run consumed and produced.
///
/// Start a run with `init`, record evidence with `add`, then `push` to
/// render and sign the attestation.
#[derive(Parser)]
#[command(name = "tessera", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output logs as JSON (for machine consumption).
    #[arg(long, global = true)]
    json_logs: bool,

    /// Configuration file (defaults to the user config directory).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Override the crafting state directory.
    #[arg(long, value_name = "PATH", global = true)]
    state_dir: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start crafting a new workflow run.
    Init(commands::init::InitArgs),
    /// Record a material in a run.
    Add(commands::add::AddArgs),
    /// Show the materials recorded so far and what is still missing.
    Status(commands::status::StatusArgs),
    /// Render and sign the attestation of a complete run.
    Push(commands::push::PushArgs),
    /// Discard a run's crafting state.
    Reset(commands::reset::ResetArgs),
    /// Verify a signed attestation's signature, predicate and digests.
    Verify(commands::verify::VerifyArgs),
    /// Display a signed attestation in human-readable format.
    Inspect(commands::inspect::InspectArgs),
    /// Print the public half of the signing key.
    PublicKey(commands::public_key::PublicKeyArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.state_dir.is_some() {
        config.state_dir = cli.state_dir;
    }

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, &config),
        Commands::Add(args) => commands::add::execute(&args, &config),
        Commands::Status(args) => commands::status::execute(&args, &config),
        Commands::Push(args) => commands::push::execute(args, &config).await,
        Commands::Reset(args) => commands::reset::execute(&args, &config),
        Commands::Verify(args) => commands::verify::execute(&args, &config),
        Commands::Inspect(args) => commands::inspect::execute(&args),
        Commands::PublicKey(args) => commands::public_key::execute(&args, &config),
    }
}
