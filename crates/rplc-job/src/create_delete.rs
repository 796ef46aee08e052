use std::collections::BTreeMap;

use parking_lot::Mutex;

use rplc_request::{Operation, Request, RequestResult};
use rplc_types::{ControllerId, DatabaseFamily, JobId, Replica};

use crate::base::JobBase;
use crate::context::JobContext;
use crate::error::JobError;
use crate::state::ExtendedState;

/// Stand-in for the Qserv-side chunk notification spec.md §4.4.7 calls
/// out ("a Qserv-side add/remove chunk notification"): out of scope for
/// this core per spec.md §1 (the czar-side query engine is an external
/// collaborator), represented as a trait so the call site and its
/// `force` derivation are still exercised and testable.
pub trait QservChunkNotifier: Send + Sync {
    fn add_chunk(&self, worker: &str, database: &str, chunk: u32);
    fn remove_chunk(&self, worker: &str, database: &str, chunk: u32, force: bool);
}

/// A notifier that does nothing, used where no Qserv endpoint is wired up
/// (unit tests, `database-test`).
#[derive(Debug, Default)]
pub struct NullChunkNotifier;

impl QservChunkNotifier for NullChunkNotifier {
    fn add_chunk(&self, _worker: &str, _database: &str, _chunk: u32) {}
    fn remove_chunk(&self, _worker: &str, _database: &str, _chunk: u32, _force: bool) {}
}

/// CreateReplicaJob (spec.md §4.4.7): one ReplicationRequest per database
/// in the family for `chunk`, landing on `destination_worker` and pulling
/// from `source_worker`, followed by a Qserv "add chunk" notification on
/// success.
pub struct CreateReplicaJob {
    pub base: JobBase,
    pub family: DatabaseFamily,
    pub chunk: u32,
    pub destination_worker: String,
    pub source_worker: String,
    pub allow_duplicate: bool,
    notifier: Box<dyn QservChunkNotifier>,
    results: Mutex<BTreeMap<String, Replica>>,
}

impl CreateReplicaJob {
    pub fn new(
        controller_id: ControllerId,
        parent_job_id: Option<JobId>,
        priority: i32,
        family: DatabaseFamily,
        chunk: u32,
        destination_worker: String,
        source_worker: String,
        allow_duplicate: bool,
        notifier: Box<dyn QservChunkNotifier>,
    ) -> Self {
        Self {
            base: JobBase::new("CREATE_REPLICA", controller_id, parent_job_id, priority),
            family,
            chunk,
            destination_worker,
            source_worker,
            allow_duplicate,
            notifier,
            results: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn results(&self) -> BTreeMap<String, Replica> {
        self.results.lock().clone()
    }

    /// Preconditions checked at `start` (spec.md §4.4.5's style of
    /// CONFIG_ERROR short-circuit applies to any job whose inputs name an
    /// unknown worker/family member).
    fn validate(&self, ctx: &JobContext) -> bool {
        self.source_worker != self.destination_worker
            && ctx.worker_addrs.contains_key(&self.source_worker)
            && ctx.worker_addrs.contains_key(&self.destination_worker)
            && !self.family.databases.is_empty()
    }

    pub fn run(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        self.base.start(ctx)?;
        if !self.validate(ctx) {
            return self.base.finish(ctx, ExtendedState::ConfigError);
        }

        let mut all_ok = true;
        let mut results = BTreeMap::new();
        for database in &self.family.databases {
            let request = Request::new(
                self.destination_worker.clone(),
                self.base.priority,
                false,
                Operation::Replicate {
                    worker_source: self.source_worker.clone(),
                    database: database.clone(),
                    chunk: self.chunk,
                    allow_duplicate: self.allow_duplicate,
                },
                ctx.clock.now(),
            );
            match ctx.execute_request(&request, Some(self.base.id())) {
                Ok(rplc_request::ExtendedState::Success) => {
                    if let Some(RequestResult::Replica(replica)) = request.result() {
                        results.insert(database.clone(), replica);
                    }
                }
                Ok(_) | Err(_) => all_ok = false,
            }
        }
        *self.results.lock() = results;

        if all_ok {
            self.notifier.add_chunk(&self.destination_worker, &self.family.name, self.chunk);
        }

        self.base.finish(ctx, if all_ok { ExtendedState::Success } else { ExtendedState::Failed })
    }
}

/// DeleteReplicaJob (spec.md §4.4.7): one DeleteRequest per database in
/// the family for `chunk`, removed from `worker`, followed by a Qserv
/// "remove chunk" notification whose `force` flag is derived from the
/// job's priority (priority above zero is treated as "urgent enough to
/// force the removal").
pub struct DeleteReplicaJob {
    pub base: JobBase,
    pub family: DatabaseFamily,
    pub chunk: u32,
    pub worker: String,
    pub allow_duplicate: bool,
    notifier: Box<dyn QservChunkNotifier>,
    results: Mutex<BTreeMap<String, Replica>>,
}

impl DeleteReplicaJob {
    pub fn new(
        controller_id: ControllerId,
        parent_job_id: Option<JobId>,
        priority: i32,
        family: DatabaseFamily,
        chunk: u32,
        worker: String,
        allow_duplicate: bool,
        notifier: Box<dyn QservChunkNotifier>,
    ) -> Self {
        Self {
            base: JobBase::new("DELETE_REPLICA", controller_id, parent_job_id, priority),
            family,
            chunk,
            worker,
            allow_duplicate,
            notifier,
            results: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn results(&self) -> BTreeMap<String, Replica> {
        self.results.lock().clone()
    }

    fn validate(&self, ctx: &JobContext) -> bool {
        ctx.worker_addrs.contains_key(&self.worker) && !self.family.databases.is_empty()
    }

    pub fn run(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        self.base.start(ctx)?;
        if !self.validate(ctx) {
            return self.base.finish(ctx, ExtendedState::ConfigError);
        }

        let mut all_ok = true;
        let mut results = BTreeMap::new();
        for database in &self.family.databases {
            let request = Request::new(
                self.worker.clone(),
                self.base.priority,
                false,
                Operation::Delete { database: database.clone(), chunk: self.chunk, allow_duplicate: self.allow_duplicate },
                ctx.clock.now(),
            );
            match ctx.execute_request(&request, Some(self.base.id())) {
                Ok(rplc_request::ExtendedState::Success) => {
                    if let Some(RequestResult::Replica(replica)) = request.result() {
                        results.insert(database.clone(), replica);
                    }
                }
                Ok(_) | Err(_) => all_ok = false,
            }
        }
        *self.results.lock() = results;

        if all_ok {
            let force = self.base.priority > 0;
            self.notifier.remove_chunk(&self.worker, &self.family.name, self.chunk, force);
        }

        self.base.finish(ctx, if all_ok { ExtendedState::Success } else { ExtendedState::Failed })
    }
}
