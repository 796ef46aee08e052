use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use rplc_request::{Operation, Request, RequestResult};
use rplc_types::{ControllerId, DatabaseFamily, JobId, Replica, ReplicaStatus};

use crate::base::JobBase;
use crate::context::JobContext;
use crate::error::JobError;
use crate::state::ExtendedState;

/// The secondary products FindAllJob derives once every FindAllRequest has
/// replied (spec.md §4.4.1). Kept as plain `BTreeMap`s rather than a
/// bespoke struct hierarchy since every field is a read-only report
/// consumed by planners in the other job types.
#[derive(Debug, Clone, Default)]
pub struct ReplicaData {
    /// `chunk -> database -> worker -> Replica`.
    pub replicas: BTreeMap<u32, BTreeMap<String, BTreeMap<String, Replica>>>,
    /// `chunk -> set of databases that reported any replica of it`.
    pub databases: BTreeMap<u32, BTreeSet<String>>,
    /// `chunk -> database -> workers holding a COMPLETE replica`.
    pub complete: BTreeMap<u32, BTreeMap<String, BTreeSet<String>>>,
    /// `chunk -> worker -> holds a replica of the chunk in every
    /// participating database`.
    pub is_colocated: BTreeMap<u32, BTreeMap<String, bool>>,
    /// `chunk -> worker -> isColocated AND every one of those replicas is
    /// COMPLETE`.
    pub is_good: BTreeMap<u32, BTreeMap<String, bool>>,
    /// `worker -> true iff every FindAllRequest issued to it succeeded`.
    pub workers: BTreeMap<String, bool>,
}

impl ReplicaData {
    /// Number of `isGood` chunks per worker — the "chunk load" the
    /// planners in the other job types balance against.
    pub fn good_chunk_counts(&self) -> BTreeMap<String, u32> {
        let mut counts: BTreeMap<String, u32> = self.workers.keys().map(|w| (w.clone(), 0)).collect();
        for per_worker in self.is_good.values() {
            for (worker, good) in per_worker {
                if *good {
                    *counts.entry(worker.clone()).or_default() += 1;
                }
            }
        }
        counts
    }

    /// Workers holding a COMPLETE replica of `(database, chunk)` for every
    /// database in `family` — eligible Replicate/FixUp sources (spec.md
    /// §4.4.2/§4.4.3).
    pub fn complete_everywhere(&self, chunk: u32, family: &DatabaseFamily) -> BTreeSet<String> {
        let Some(per_database) = self.complete.get(&chunk) else { return BTreeSet::new() };
        let mut candidates: Option<BTreeSet<String>> = None;
        for database in &family.databases {
            let workers = per_database.get(database).cloned().unwrap_or_default();
            candidates = Some(match candidates {
                None => workers,
                Some(prev) => prev.intersection(&workers).cloned().collect(),
            });
        }
        candidates.unwrap_or_default()
    }

    /// Every worker observed hosting at least one replica of `chunk`,
    /// across any database (spec.md §4.4.2's "holds replicas of `c` for
    /// other databases of the family").
    pub fn workers_touching_chunk(&self, chunk: u32) -> BTreeSet<String> {
        self.replicas.get(&chunk).into_iter().flat_map(|per_db| per_db.values()).flat_map(|per_worker| per_worker.keys().cloned()).collect()
    }

    pub fn has_replica(&self, chunk: u32, database: &str, worker: &str) -> bool {
        self.replicas.get(&chunk).and_then(|d| d.get(database)).is_some_and(|w| w.contains_key(worker))
    }

    pub fn all_chunks(&self) -> Vec<u32> {
        self.replicas.keys().copied().collect()
    }
}

/// FindAllJob (spec.md §4.4.1): fans a `FindAll` request out to every
/// `(worker, database)` pair in a family and merges the replies into
/// [`ReplicaData`].
pub struct FindAllJob {
    pub base: JobBase,
    pub family: DatabaseFamily,
    pub save_replica_info: bool,
    pub all_workers: bool,
    data: Mutex<ReplicaData>,
}

impl FindAllJob {
    pub fn new(controller_id: ControllerId, parent_job_id: Option<JobId>, priority: i32, family: DatabaseFamily, save_replica_info: bool, all_workers: bool) -> Self {
        Self {
            base: JobBase::new("FIND_ALL", controller_id, parent_job_id, priority),
            family,
            save_replica_info,
            all_workers,
            data: Mutex::new(ReplicaData::default()),
        }
    }

    pub fn replica_data(&self) -> ReplicaData {
        self.data.lock().clone()
    }

    fn resolve_workers(&self, ctx: &JobContext) -> Result<Vec<String>, JobError> {
        if self.all_workers {
            let mut workers = ctx.known_workers();
            workers.sort();
            Ok(workers)
        } else {
            let mut workers = ctx.services.enabled_workers()?;
            workers.sort();
            Ok(workers)
        }
    }

    /// Runs the job to completion on the calling thread: one worker per
    /// `std::thread::scope` slot, each issuing its `(worker, database)`
    /// FindAll requests in database order, then a single merge pass
    /// deriving the secondary products (spec.md §4.4.1).
    pub fn run(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        self.base.start(ctx)?;
        let workers = self.resolve_workers(ctx)?;

        let worker_results: Mutex<Vec<(String, bool, Vec<(String, Replica)>)>> = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for worker in &workers {
                scope.spawn(|| {
                    let mut worker_ok = true;
                    let mut collected = Vec::new();
                    for database in &self.family.databases {
                        let request = Request::new(
                            worker.clone(),
                            self.base.priority,
                            false,
                            Operation::FindAll { database: database.clone(), save_replica_info: self.save_replica_info },
                            ctx.clock.now(),
                        );
                        match ctx.execute_request(&request, Some(self.base.id())) {
                            Ok(rplc_request::ExtendedState::Success) => {
                                if let Some(RequestResult::Replicas(replicas)) = request.result() {
                                    for replica in replicas {
                                        collected.push((database.clone(), replica));
                                    }
                                }
                            }
                            Ok(_) => worker_ok = false,
                            Err(e) => {
                                tracing::warn!(worker, error = %e, "FindAll request failed");
                                worker_ok = false;
                            }
                        }
                    }
                    worker_results.lock().push((worker.clone(), worker_ok, collected));
                });
            }
        });

        let mut data = ReplicaData::default();
        let mut all_ok = true;
        for (worker, worker_ok, collected) in worker_results.into_inner() {
            data.workers.insert(worker.clone(), worker_ok);
            all_ok &= worker_ok;
            for (database, replica) in collected {
                data.replicas.entry(replica.chunk).or_default().entry(database).or_default().insert(worker.clone(), replica);
            }
        }
        derive_secondary_products(&mut data);
        *self.data.lock() = data;

        let extended = if all_ok { ExtendedState::Success } else { ExtendedState::Failed };
        self.base.finish(ctx, extended)
    }
}

fn derive_secondary_products(data: &mut ReplicaData) {
    let chunks: Vec<u32> = data.replicas.keys().copied().collect();
    for chunk in chunks {
        let per_database = data.replicas.get(&chunk).cloned().unwrap_or_default();
        let databases: BTreeSet<String> = per_database.keys().cloned().collect();

        let mut complete_per_db: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut all_workers_for_chunk: BTreeSet<String> = BTreeSet::new();
        for (database, per_worker) in &per_database {
            all_workers_for_chunk.extend(per_worker.keys().cloned());
            let complete_workers: BTreeSet<String> =
                per_worker.iter().filter(|(_, r)| r.status == ReplicaStatus::Complete).map(|(w, _)| w.clone()).collect();
            complete_per_db.insert(database.clone(), complete_workers);
        }

        let mut colocated: BTreeMap<String, bool> = BTreeMap::new();
        let mut good: BTreeMap<String, bool> = BTreeMap::new();
        for worker in &all_workers_for_chunk {
            let is_colocated = databases.iter().all(|d| per_database.get(d).is_some_and(|w| w.contains_key(worker)));
            let is_good = is_colocated
                && databases.iter().all(|d| complete_per_db.get(d).is_some_and(|workers| workers.contains(worker)));
            colocated.insert(worker.clone(), is_colocated);
            good.insert(worker.clone(), is_good);
        }

        data.databases.insert(chunk, databases);
        data.complete.insert(chunk, complete_per_db);
        data.is_colocated.insert(chunk, colocated);
        data.is_good.insert(chunk, good);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rplc_messenger::Messenger;
    use rplc_services::MemoryDatabaseServices;
    use rplc_types::FakeClock;
    use rplc_worker::{WorkerConfig, WorkerServer};
    use std::collections::HashMap;
    use std::net::{SocketAddr, TcpListener};
    use std::sync::Arc;
    use std::time::Duration;

    fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    fn start_worker(name: &str, addr: SocketAddr, tables: &[(&str, &[&str])]) -> (Arc<WorkerConfig>, WorkerServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig::new(name, addr, dir.path(), dir.path().join("scratch"));
        for (database, table_list) in tables {
            for table in *table_list {
                config = config.with_table(*database, *table);
            }
        }
        let config = Arc::new(config);
        let server = WorkerServer::start(config.clone(), 2).unwrap();
        (config, server, dir)
    }

    fn touch_chunk_files(config: &WorkerConfig, database: &str, chunk: u32) {
        rplc_worker::ensure_dir(&config.chunk_dir(database)).unwrap();
        for name in config.expected_files(database, chunk).unwrap() {
            std::fs::write(config.file_path(database, &name), b"x").unwrap();
        }
    }

    #[test]
    fn find_all_round_trip_matches_scenario_one() {
        let addr1 = free_addr();
        let addr2 = free_addr();
        let (config1, _server1, _dir1) = start_worker("w1", addr1, &[("db", &["t"])]);
        let (config2, _server2, _dir2) = start_worker("w2", addr2, &[("db", &["t"])]);
        touch_chunk_files(&config1, "db", 1);
        touch_chunk_files(&config1, "db", 2);
        touch_chunk_files(&config2, "db", 1);
        std::thread::sleep(Duration::from_millis(100));

        let services: Arc<dyn rplc_services::DatabaseServices> = Arc::new(MemoryDatabaseServices::new());
        let messenger = Arc::new(Messenger::start().unwrap());
        let mut worker_addrs = HashMap::new();
        worker_addrs.insert("w1".to_string(), addr1);
        worker_addrs.insert("w2".to_string(), addr2);
        let ctx = JobContext {
            services,
            messenger,
            chunk_locks: Arc::new(rplc_services::ChunkLockRegistry::new()),
            clock: Arc::new(FakeClock::new(1)),
            worker_addrs,
            instance_id: "test".to_string(),
            request_timeout: Duration::from_secs(5),
            controller_id: ControllerId::new(),
        };

        let family = DatabaseFamily::new("f", vec!["db".to_string()], 2);
        let job = FindAllJob::new(ctx.controller_id, None, 0, family, true, true);
        let outcome = job.run(&ctx).unwrap();
        assert_eq!(outcome, ExtendedState::Success);

        let data = job.replica_data();
        assert_eq!(data.is_colocated[&1]["w1"], true);
        assert_eq!(data.is_colocated[&1]["w2"], true);
        assert_eq!(data.is_colocated[&2]["w1"], true);
        assert_eq!(*data.is_colocated[&2].get("w2").unwrap_or(&false), false);
        assert_eq!(data.complete[&1]["db"], BTreeSet::from(["w1".to_string(), "w2".to_string()]));
        assert_eq!(data.complete[&2]["db"], BTreeSet::from(["w1".to_string()]));
        assert_eq!(data.workers["w1"], true);
        assert_eq!(data.workers["w2"], true);
    }
}
