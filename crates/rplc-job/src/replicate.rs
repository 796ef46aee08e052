use std::collections::{BTreeMap, BTreeSet};

use rplc_types::{ControllerId, DatabaseFamily, JobId};

use crate::base::JobBase;
use crate::context::JobContext;
use crate::create_delete::{CreateReplicaJob, NullChunkNotifier, QservChunkNotifier};
use crate::error::JobError;
use crate::find_all::FindAllJob;
use crate::planner;
use crate::state::ExtendedState;

/// ReplicateJob (spec.md §4.4.3): runs FindAllJob, then for every chunk
/// whose good-replica count is below the target, creates new replicas on
/// load-minimizing destinations pulling from load-minimizing sources.
pub struct ReplicateJob {
    pub base: JobBase,
    pub family: DatabaseFamily,
    /// `0` means "use the family's configured replication level".
    pub num_replicas: u32,
}

impl ReplicateJob {
    pub fn new(controller_id: ControllerId, parent_job_id: Option<JobId>, priority: i32, family: DatabaseFamily, num_replicas: u32) -> Self {
        Self { base: JobBase::new("REPLICATE", controller_id, parent_job_id, priority), family, num_replicas }
    }

    fn target(&self) -> u32 {
        if self.num_replicas == 0 {
            self.family.replication_level
        } else {
            self.num_replicas
        }
    }

    pub fn run(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        self.base.start(ctx)?;

        let find_all = FindAllJob::new(self.base.controller_id, Some(self.base.id()), self.base.priority, self.family.clone(), true, true);
        if find_all.run(ctx)? != ExtendedState::Success {
            return self.base.finish(ctx, ExtendedState::Failed);
        }
        let data = find_all.replica_data();

        let target = self.target();
        let mut loads = data.good_chunk_counts();
        let known: BTreeSet<String> = planner::known_workers(&data.workers).cloned().collect();
        let mut all_ok = true;
        let mut num_failed_locks = 0u32;

        for chunk in data.all_chunks() {
            let good_count = data.is_good.get(&chunk).map_or(0, |m| m.values().filter(|v| **v).count() as u32);
            let needed = target.saturating_sub(good_count);
            if needed == 0 {
                continue;
            }
            if !ctx.chunk_locks.try_acquire(&self.family.name, chunk, self.base.id()) {
                num_failed_locks += 1;
                continue;
            }

            let mut already_good: BTreeSet<String> = data.is_good.get(&chunk).into_iter().flat_map(|m| m.iter()).filter(|(_, v)| **v).map(|(w, _)| w.clone()).collect();
            let sources: BTreeSet<String> = data.complete_everywhere(chunk, &self.family).intersection(&known).cloned().collect();

            for _ in 0..needed {
                let destination_candidates: Vec<&String> = known.iter().filter(|w| !already_good.contains(*w)).collect();
                let Some(destination) = planner::least_loaded(destination_candidates, &loads) else {
                    break;
                };
                let Some(source) = planner::least_loaded(&sources, &loads) else {
                    all_ok = false;
                    break;
                };

                let create = CreateReplicaJob::new(
                    self.base.controller_id,
                    Some(self.base.id()),
                    self.base.priority,
                    self.family.clone(),
                    chunk,
                    destination.clone(),
                    source,
                    false,
                    Box::new(NullChunkNotifier) as Box<dyn QservChunkNotifier>,
                );
                match create.run(ctx)? {
                    ExtendedState::Success => {
                        *loads.entry(destination.clone()).or_default() += 1;
                        already_good.insert(destination);
                    }
                    _ => {
                        all_ok = false;
                        break;
                    }
                }
            }

            ctx.chunk_locks.release(&self.family.name, chunk, self.base.id());
        }

        if num_failed_locks > 0 {
            tracing::debug!(job_id = %self.base.id(), num_failed_locks, "chunks skipped this pass due to lock contention");
        }

        self.base.finish(ctx, if all_ok { ExtendedState::Success } else { ExtendedState::Failed })
    }
}
