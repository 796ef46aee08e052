//! `job-chunks <databaseFamily> [...]` (spec.md §6): launches one of the
//! two family-wide chunk jobs not already covered by a dedicated
//! subcommand — `FixUpJob` or `RebalanceJob` — selected by `--kind`
//! (spec.md §6 lists this subcommand without pinning down which job it
//! launches; see DESIGN.md for this resolution).

use anyhow::Result;
use clap::{Args as ClapArgs, ValueEnum};
use rplc::config::Settings;
use rplc::Controller;
use rplc_job::{FixUpJob, RebalanceJob};

use crate::exit::{from_extended_state, ExitCode};

#[derive(Clone, Copy, ValueEnum)]
pub enum JobKind {
    FixUp,
    Rebalance,
}

#[derive(ClapArgs)]
pub struct Args {
    /// Database family to operate on.
    pub family: String,

    #[arg(long, value_enum, default_value = "fix-up")]
    pub kind: JobKind,

    /// Rebalance only: compute and print the plan without executing it.
    #[arg(long)]
    pub estimate_only: bool,

    #[arg(long, default_value_t = 4)]
    pub max_concurrent_per_worker: usize,
}

pub fn run(settings: &Settings, args: Args) -> Result<ExitCode> {
    let controller = Controller::new(settings)?;
    let family = controller.family(&args.family)?.clone();
    let ctx = controller.context();

    let extended = match args.kind {
        JobKind::FixUp => {
            let job = FixUpJob::new(controller.id, None, 0, family, args.max_concurrent_per_worker);
            job.run(&ctx)?
        }
        JobKind::Rebalance => {
            let job = RebalanceJob::new(controller.id, None, 0, family, args.estimate_only, args.max_concurrent_per_worker);
            let extended = job.run(&ctx)?;
            for entry in job.plan() {
                println!("  chunk {:<8} {} -> {}", entry.chunk, entry.source_worker, entry.destination_worker);
            }
            extended
        }
    };
    println!("extended state: {extended}");

    Ok(from_extended_state(extended))
}
