//! `database-test <operation> [...]` (spec.md §6): inspects
//! `DatabaseServices` directly, bypassing the Job/Request machinery.

use anyhow::Result;
use clap::{Args as ClapArgs, Subcommand};
use rplc::config::Settings;
use rplc::Controller;
use rplc_services::DatabaseServices;

use crate::exit::ExitCode;

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub operation: Operation,
}

#[derive(Subcommand)]
pub enum Operation {
    /// Prints the loaded configuration: controller host, known workers, families.
    Configuration,

    /// `findOldestReplicas`: the `n` replicas least recently verified.
    FindOldestReplicas {
        database: String,
        num_replicas: usize,
        #[arg(long)]
        enabled_workers_only: bool,
    },

    /// `findReplicas`: every replica of one chunk.
    FindReplicas {
        database: String,
        chunk: u32,
        #[arg(long)]
        enabled_only: bool,
    },

    /// `findWorkerReplicas`: every replica a worker reports, optionally scoped to one database.
    FindWorkerReplicas {
        worker: String,
        database: Option<String>,
    },
}

pub fn run(settings: &Settings, args: Args) -> Result<ExitCode> {
    let controller = Controller::new(settings)?;

    match args.operation {
        Operation::Configuration => {
            println!("controller: {}", controller.id);
            println!("workers:");
            for (name, addr) in &controller.worker_addrs {
                println!("  {name:<24} {addr}");
            }
            println!("families:");
            for family in &controller.families {
                println!("  {:<24} replication_level={}", family.name, family.replication_level);
            }
        }
        Operation::FindOldestReplicas { database, num_replicas, enabled_workers_only } => {
            let replicas = controller.services.find_oldest_replicas(&database, num_replicas, enabled_workers_only)?;
            print_replicas(&replicas);
        }
        Operation::FindReplicas { database, chunk, enabled_only } => {
            let replicas = controller.services.find_replicas(&database, chunk, enabled_only)?;
            print_replicas(&replicas);
        }
        Operation::FindWorkerReplicas { worker, database } => {
            let replicas = controller.services.find_worker_replicas(&worker, database.as_deref())?;
            print_replicas(&replicas);
        }
    }

    Ok(ExitCode::Success)
}

fn print_replicas(replicas: &[rplc_types::Replica]) {
    for r in replicas {
        println!("  {:<16} {:<16} chunk={:<6} status={}", r.worker, r.database, r.chunk, r.status);
    }
}
