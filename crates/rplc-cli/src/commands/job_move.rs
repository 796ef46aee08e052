//! `job-move <databaseFamily> <chunk> <sourceWorker> <destinationWorker>
//! [--purge]` (spec.md §6).

use anyhow::Result;
use clap::Args as ClapArgs;
use rplc::config::Settings;
use rplc::Controller;
use rplc_job::MoveReplicaJob;

use crate::exit::{from_extended_state, ExitCode};

#[derive(ClapArgs)]
pub struct Args {
    pub family: String,
    pub chunk: u32,
    pub source_worker: String,
    pub destination_worker: String,

    /// Delete the source replica once the destination is in place.
    #[arg(long)]
    pub purge: bool,
}

pub fn run(settings: &Settings, args: Args) -> Result<ExitCode> {
    let controller = Controller::new(settings)?;
    let family = controller.family(&args.family)?.clone();
    let ctx = controller.context();

    let job = MoveReplicaJob::new(
        controller.id,
        None,
        0,
        family,
        args.chunk,
        args.source_worker,
        args.destination_worker,
        args.purge,
    );
    let extended = job.run(&ctx)?;
    println!("extended state: {extended}");

    Ok(from_extended_state(extended))
}
