//! `controller-replicate <database> <numReplicas>` (spec.md §6):
//! planner+executor loop to reach a target replication count.

use anyhow::Result;
use clap::Args as ClapArgs;
use rplc::config::Settings;
use rplc::Controller;
use rplc_job::ReplicateJob;

use crate::exit::{from_extended_state, ExitCode};

#[derive(ClapArgs)]
pub struct Args {
    /// Database to replicate (its family is looked up from configuration).
    pub database: String,

    /// Target number of replicas per chunk.
    pub num_replicas: u32,
}

pub fn run(settings: &Settings, args: Args) -> Result<ExitCode> {
    let controller = Controller::new(settings)?;
    let family = controller.family_for_database(&args.database)?.clone();
    let ctx = controller.context();

    let job = ReplicateJob::new(controller.id, None, 0, family, args.num_replicas);
    let extended = job.run(&ctx)?;
    println!("extended state: {extended}");

    Ok(from_extended_state(extended))
}
