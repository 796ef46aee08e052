//! `controller-purge <database> <numReplicas>` (spec.md §6): symmetric
//! reducer, trims replicas down to a target count.

use anyhow::Result;
use clap::Args as ClapArgs;
use rplc::config::Settings;
use rplc::Controller;
use rplc_job::PurgeJob;

use crate::exit::{from_extended_state, ExitCode};

#[derive(ClapArgs)]
pub struct Args {
    /// Database to purge (its family is looked up from configuration).
    pub database: String,

    /// Target number of replicas per chunk. `0` uses the family's configured replication level.
    pub num_replicas: u32,
}

pub fn run(settings: &Settings, args: Args) -> Result<ExitCode> {
    let controller = Controller::new(settings)?;
    let family = controller.family_for_database(&args.database)?.clone();
    let ctx = controller.context();

    let job = PurgeJob::new(controller.id, None, 0, family, args.num_replicas);
    let extended = job.run(&ctx)?;
    println!("extended state: {extended}");

    Ok(from_extended_state(extended))
}
