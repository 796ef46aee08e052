use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use rplc_request::{Operation, Request};
use rplc_types::{ControllerId, DatabaseFamily, JobId};

use crate::base::JobBase;
use crate::context::JobContext;
use crate::error::JobError;
use crate::find_all::FindAllJob;
use crate::planner::known_workers;
use crate::state::ExtendedState;

#[derive(Debug, Clone)]
struct ReplicationTask {
    destination: String,
    source: String,
    database: String,
    chunk: u32,
}

enum PassOutcome {
    Done(ExtendedState),
    NeedsRestart,
}

/// FixUpJob (spec.md §4.4.2): after a FindAllJob pass, plans a
/// `ReplicationTask` for every `(destination, source, database, chunk)`
/// where the destination already hosts some of the chunk's other
/// databases but is missing this one, and executes the plan with bounded
/// per-destination-worker concurrency. A single restart is attempted if
/// any chunk in the plan was skipped for lock contention.
pub struct FixUpJob {
    pub base: JobBase,
    pub family: DatabaseFamily,
    pub max_concurrent_per_worker: usize,
}

impl FixUpJob {
    pub fn new(controller_id: ControllerId, parent_job_id: Option<JobId>, priority: i32, family: DatabaseFamily, max_concurrent_per_worker: usize) -> Self {
        Self { base: JobBase::new("FIX_UP", controller_id, parent_job_id, priority), family, max_concurrent_per_worker }
    }

    pub fn run(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        self.base.start(ctx)?;

        let first = self.run_once(ctx)?;
        let extended = match first {
            PassOutcome::Done(extended) => extended,
            PassOutcome::NeedsRestart => match self.run_once(ctx)? {
                PassOutcome::Done(extended) => extended,
                PassOutcome::NeedsRestart => ExtendedState::Failed,
            },
        };
        self.base.finish(ctx, extended)
    }

    fn plan(&self, ctx: &JobContext) -> Result<BTreeMap<String, Vec<ReplicationTask>>, JobError> {
        let find_all = FindAllJob::new(self.base.controller_id, Some(self.base.id()), self.base.priority, self.family.clone(), true, true);
        if find_all.run(ctx)? != ExtendedState::Success {
            return Ok(BTreeMap::new());
        }
        let data = find_all.replica_data();
        let known: std::collections::BTreeSet<String> = known_workers(&data.workers).cloned().collect();

        let mut tasks_by_dest: BTreeMap<String, Vec<ReplicationTask>> = BTreeMap::new();
        for chunk in data.all_chunks() {
            let touching = data.workers_touching_chunk(chunk);
            for database in &self.family.databases {
                let complete_for_db = data.complete.get(&chunk).and_then(|m| m.get(database)).cloned().unwrap_or_default();
                for w_dst in touching.intersection(&known) {
                    if complete_for_db.contains(w_dst) || data.has_replica(chunk, database, w_dst) {
                        continue;
                    }
                    if let Some(w_src) = complete_for_db.iter().filter(|s| known.contains(*s)).find(|s| *s != w_dst) {
                        tasks_by_dest.entry(w_dst.clone()).or_default().push(ReplicationTask {
                            destination: w_dst.clone(),
                            source: w_src.clone(),
                            database: database.clone(),
                            chunk,
                        });
                    }
                }
            }
        }
        Ok(tasks_by_dest)
    }

    fn run_once(&self, ctx: &JobContext) -> Result<PassOutcome, JobError> {
        let tasks_by_dest = self.plan(ctx)?;
        if tasks_by_dest.is_empty() {
            return Ok(PassOutcome::Done(ExtendedState::Success));
        }

        let num_failed_locks = AtomicU32::new(0);
        let any_failed = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for tasks in tasks_by_dest.values() {
                let queue = Mutex::new(VecDeque::from(tasks.clone()));
                let num_workers = self.max_concurrent_per_worker.max(1).min(tasks.len());
                for _ in 0..num_workers {
                    let queue = &queue;
                    let num_failed_locks = &num_failed_locks;
                    let any_failed = &any_failed;
                    scope.spawn(move || loop {
                        let task = queue.lock().pop_front();
                        let Some(task) = task else { break };
                        if !ctx.chunk_locks.try_acquire(&self.family.name, task.chunk, self.base.id()) {
                            num_failed_locks.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        let request = Request::new(
                            task.destination.clone(),
                            self.base.priority,
                            false,
                            Operation::Replicate {
                                worker_source: task.source.clone(),
                                database: task.database.clone(),
                                chunk: task.chunk,
                                allow_duplicate: false,
                            },
                            ctx.clock.now(),
                        );
                        match ctx.execute_request(&request, Some(self.base.id())) {
                            Ok(rplc_request::ExtendedState::Success) => {}
                            _ => any_failed.store(true, Ordering::Relaxed),
                        }
                        ctx.chunk_locks.release(&self.family.name, task.chunk, self.base.id());
                    });
                }
            }
        });

        if num_failed_locks.load(Ordering::Relaxed) > 0 {
            Ok(PassOutcome::NeedsRestart)
        } else if any_failed.load(Ordering::Relaxed) {
            Ok(PassOutcome::Done(ExtendedState::Failed))
        } else {
            Ok(PassOutcome::Done(ExtendedState::Success))
        }
    }
}
