use std::collections::BTreeSet;

use rplc_types::{ControllerId, DatabaseFamily, JobId};

use crate::base::JobBase;
use crate::context::JobContext;
use crate::create_delete::{DeleteReplicaJob, NullChunkNotifier, QservChunkNotifier};
use crate::error::JobError;
use crate::find_all::FindAllJob;
use crate::planner;
use crate::state::ExtendedState;

/// PurgeJob (spec.md §4.4.6): the mirror image of ReplicateJob. For every
/// chunk whose good-replica count exceeds the target, repeatedly deletes
/// the copy held by the most-loaded eligible worker until the target is
/// met.
pub struct PurgeJob {
    pub base: JobBase,
    pub family: DatabaseFamily,
    /// `0` means "use the family's configured replication level".
    pub num_replicas: u32,
}

impl PurgeJob {
    pub fn new(controller_id: ControllerId, parent_job_id: Option<JobId>, priority: i32, family: DatabaseFamily, num_replicas: u32) -> Self {
        Self { base: JobBase::new("PURGE", controller_id, parent_job_id, priority), family, num_replicas }
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

        let find_all = FindAllJob::new(self.base.controller_id, Some(self.base.id()), self.base.priority, self.family.clone(), true, false);
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
            let mut good_workers: BTreeSet<String> = data
                .is_good
                .get(&chunk)
                .into_iter()
                .flat_map(|m| m.iter())
                .filter(|(w, v)| **v && known.contains(*w))
                .map(|(w, _)| w.clone())
                .collect();
            let good_count = good_workers.len() as u32;
            let excess = good_count.saturating_sub(target);
            if excess == 0 {
                continue;
            }
            if !ctx.chunk_locks.try_acquire(&self.family.name, chunk, self.base.id()) {
                num_failed_locks += 1;
                continue;
            }

            for _ in 0..excess {
                let Some(victim) = planner::most_loaded(good_workers.iter(), &loads) else { break };
                let delete = DeleteReplicaJob::new(
                    self.base.controller_id,
                    Some(self.base.id()),
                    self.base.priority,
                    self.family.clone(),
                    chunk,
                    victim.clone(),
                    false,
                    Box::new(NullChunkNotifier) as Box<dyn QservChunkNotifier>,
                );
                match delete.run(ctx)? {
                    ExtendedState::Success => {
                        good_workers.remove(&victim);
                        if let Some(l) = loads.get_mut(&victim) {
                            *l = l.saturating_sub(1);
                        }
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
