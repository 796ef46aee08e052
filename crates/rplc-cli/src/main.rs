//! `rplc`: thin CLI wrappers that instantiate a [`rplc::Controller`] and
//! launch one job, or inspect `DatabaseServices` directly (spec.md §6's
//! "illustrative" CLI surface).

mod commands;
mod exit;

use clap::{Parser, Subcommand};

pub use exit::ExitCode;

/// Replica-management control plane CLI.
#[derive(Parser)]
#[command(name = "rplc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory to load `replicator.toml`/`replicator.local.toml` from.
    #[arg(long, global = true)]
    config_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run FindAllJob semantics and print the replica distribution for a database's family.
    ControllerChunks(commands::controller_chunks::Args),

    /// Planner+executor loop to reach a target replication count.
    ControllerReplicate(commands::controller_replicate::Args),

    /// Symmetric reducer: trims replicas down to a target count.
    ControllerPurge(commands::controller_purge::Args),

    /// Launch a family-wide chunk job (fix-up or rebalance).
    JobChunks(commands::job_chunks::Args),

    /// Move one chunk replica from one worker to another.
    JobMove(commands::job_move::Args),

    /// Inspect `DatabaseServices` directly.
    DatabaseTest(commands::database_test::Args),
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config_dir {
        Some(dir) => rplc::config::Settings::load_from_dir(dir),
        None => rplc::config::Settings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: failed to load configuration: {e}");
            return ExitCode::ArgumentOrConfig.into();
        }
    };

    let result = match cli.command {
        Commands::ControllerChunks(args) => commands::controller_chunks::run(&settings, args),
        Commands::ControllerReplicate(args) => commands::controller_replicate::run(&settings, args),
        Commands::ControllerPurge(args) => commands::controller_purge::run(&settings, args),
        Commands::JobChunks(args) => commands::job_chunks::run(&settings, args),
        Commands::JobMove(args) => commands::job_move::run(&settings, args),
        Commands::DatabaseTest(args) => commands::database_test::run(&settings, args),
    };

    match result {
        Ok(code) => code.into(),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::Runtime.into()
        }
    }
}
