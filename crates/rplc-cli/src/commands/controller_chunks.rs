//! `controller-chunks <database>` (spec.md §6): runs FindAllJob semantics
//! at request level and prints the replica distribution.

use anyhow::Result;
use clap::Args as ClapArgs;
use rplc::config::Settings;
use rplc::Controller;
use rplc_job::FindAllJob;

use crate::exit::{from_extended_state, ExitCode};

#[derive(ClapArgs)]
pub struct Args {
    /// Database to inspect (its family is looked up from configuration).
    pub database: String,

    /// Query every known worker, not only those marked enabled.
    #[arg(long)]
    pub all_workers: bool,

    /// Skip persisting the observed replica set back to the catalog.
    #[arg(long)]
    pub do_not_save_replica: bool,
}

pub fn run(settings: &Settings, args: Args) -> Result<ExitCode> {
    let controller = Controller::new(settings)?;
    let family = controller.family_for_database(&args.database)?.clone();
    let ctx = controller.context();

    let job = FindAllJob::new(controller.id, None, 0, family.clone(), !args.do_not_save_replica, args.all_workers);
    let extended = job.run(&ctx)?;

    let data = job.replica_data();
    println!("Replica distribution for family {:?}:", family.name);
    for (worker, count) in data.good_chunk_counts() {
        println!("  {worker:<24} {count} good chunks");
    }
    for chunk in data.all_chunks() {
        let workers = data.workers_touching_chunk(chunk);
        println!("  chunk {chunk:<8} on [{}]", workers.into_iter().collect::<Vec<_>>().join(", "));
    }
    println!("extended state: {extended}");

    Ok(from_extended_state(extended))
}
