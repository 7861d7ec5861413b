mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{backup::BackupSubcommand, secrets::SecretsSubcommand};
use shipway_core::ShipwayError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shipway",
    about = "Single-host deployment orchestrator — provision, deploy, verify, roll back",
    version,
    propagate_version = true
)]
struct Cli {
    /// Deployment root (default: auto-detect from .shipway/ or .git/)
    #[arg(long, global = true, env = "SHIPWAY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize shipway in the current directory
    Init,

    /// Run the deployment pipeline end to end
    Deploy,

    /// Roll back a recorded run (latest failed run by default)
    Rollback {
        /// Run id to roll back
        #[arg(long = "to")]
        run_id: Option<String>,
    },

    /// Manage database snapshots
    Backup {
        #[command(subcommand)]
        subcommand: BackupSubcommand,
    },

    /// Probe configured health endpoints
    Health {
        /// Check a single target by name
        #[arg(long)]
        target: Option<String>,
    },

    /// Show the latest run and service states
    Status,

    /// Check host requirements without deploying
    Validate,

    /// Inspect and rotate managed secrets (values are never printed)
    Secrets {
        #[command(subcommand)]
        subcommand: SecretsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let root_path = cli.root.as_deref();
    let root = root::resolve_root(root_path);

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Deploy => cmd::deploy::run(&root, cli.json),
        Commands::Rollback { run_id } => cmd::rollback::run(&root, run_id.as_deref(), cli.json),
        Commands::Backup { subcommand } => cmd::backup::run(&root, subcommand, cli.json),
        Commands::Health { target } => cmd::health::run(&root, target.as_deref(), cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Validate => cmd::validate::run(&root, cli.json),
        Commands::Secrets { subcommand } => cmd::secrets::run(&root, subcommand, cli.json),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(exit_code(&e));
        }
    }
}

/// Map core errors to the documented exit codes. Anything without a specific
/// mapping is a plain failure.
fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<ShipwayError>() {
        Some(ShipwayError::DeploymentInProgress { .. }) => 4,
        Some(ShipwayError::RollbackPartialFailure { .. }) => 3,
        _ => 1,
    }
}
