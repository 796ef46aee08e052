//! `Controller` (spec.md §3): "a process that plans and executes Jobs
//! against a fleet of workers." This crate's `Controller` is the
//! dependency root — constructed once from an injected
//! [`rplc_config::Settings`] (SPEC_FULL.md §9: "never a global") — that
//! every CLI subcommand builds a [`JobContext`] from before launching one
//! Job.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rplc_config::Settings;
use rplc_job::JobContext;
use rplc_messenger::Messenger;
use rplc_services::{ChunkLockRegistry, ControllerIdentity, DatabaseServices, MemoryDatabaseServices, SqliteDatabaseServices};
use rplc_types::{Clock, ControllerId, DatabaseFamily, SystemClock};

use crate::error::ReplicatorError;

pub struct Controller {
    pub id: ControllerId,
    pub services: Arc<dyn DatabaseServices>,
    pub messenger: Arc<Messenger>,
    pub chunk_locks: Arc<ChunkLockRegistry>,
    pub clock: Arc<dyn Clock>,
    pub worker_addrs: HashMap<String, SocketAddr>,
    pub families: Vec<DatabaseFamily>,
    pub request_timeout: Duration,
}

impl Controller {
    /// Builds the services backend named by `settings.services`, starts
    /// the Messenger's event loop, parses every configured worker's
    /// address, and registers this process as a `ControllerIdentity`
    /// (spec.md §6's `controller(id, hostname, pid, started)` table).
    pub fn new(settings: &Settings) -> Result<Self, ReplicatorError> {
        let services: Arc<dyn DatabaseServices> = match &settings.services {
            rplc_config::ServicesSettings::Memory => Arc::new(MemoryDatabaseServices::new()),
            rplc_config::ServicesSettings::Sqlite { path } => Arc::new(SqliteDatabaseServices::open(path)?),
        };
        let messenger = Arc::new(Messenger::start()?);
        let chunk_locks = Arc::new(ChunkLockRegistry::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let mut worker_addrs = HashMap::with_capacity(settings.workers.len());
        for worker in &settings.workers {
            let addr: SocketAddr = worker.address.parse().map_err(|source| ReplicatorError::InvalidWorkerAddress {
                worker: worker.name.clone(),
                address: worker.address.clone(),
                source,
            })?;
            worker_addrs.insert(worker.name.clone(), addr);
        }

        let id = ControllerId::new();
        let identity = ControllerIdentity {
            id,
            hostname: hostname(),
            pid: std::process::id(),
            started: clock.now(),
        };
        services.save_controller(&identity)?;

        Ok(Self {
            id,
            services,
            messenger,
            chunk_locks,
            clock,
            worker_addrs,
            families: settings.families.clone(),
            request_timeout: Duration::from_secs(settings.controller.request_timeout_secs),
        })
    }

    pub fn family(&self, name: &str) -> Result<&DatabaseFamily, ReplicatorError> {
        self.families.iter().find(|f| f.name == name).ok_or_else(|| ReplicatorError::UnknownFamily(name.to_string()))
    }

    /// Finds the family that contains `database`, since several CLI
    /// entry points (spec.md §6's `controller-chunks <database>`) take a
    /// database name rather than a family name.
    pub fn family_for_database(&self, database: &str) -> Result<&DatabaseFamily, ReplicatorError> {
        self.families
            .iter()
            .find(|f| f.contains_database(database))
            .ok_or_else(|| ReplicatorError::UnknownFamily(database.to_string()))
    }

    /// Builds the per-call [`JobContext`] bundle every Job's `run` takes.
    /// Cheap: every field is an `Arc` clone or a plain copy.
    pub fn context(&self) -> JobContext {
        JobContext {
            services: self.services.clone(),
            messenger: self.messenger.clone(),
            chunk_locks: self.chunk_locks.clone(),
            clock: self.clock.clone(),
            worker_addrs: self.worker_addrs.clone(),
            instance_id: self.id.to_string(),
            request_timeout: self.request_timeout,
            controller_id: self.id,
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_carries_the_controller_id_through() {
        let settings = Settings { services: rplc_config::ServicesSettings::Memory, ..Settings::default() };
        let controller = Controller::new(&settings).unwrap();
        let ctx = controller.context();
        assert_eq!(ctx.controller_id, controller.id);
        assert!(ctx.worker_addrs.is_empty());
    }
}
