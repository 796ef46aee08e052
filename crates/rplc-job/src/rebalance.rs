use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use rplc_types::{ControllerId, DatabaseFamily, JobId};

use crate::base::JobBase;
use crate::context::JobContext;
use crate::error::JobError;
use crate::find_all::FindAllJob;
use crate::move_replica::MoveReplicaJob;
use crate::planner;
use crate::state::ExtendedState;

#[derive(Debug, Clone)]
pub struct RebalancePlanEntry {
    pub chunk: u32,
    pub source_worker: String,
    pub destination_worker: String,
}

/// RebalanceJob (spec.md §4.4.4): after a FindAllJob pass restricted to
/// enabled workers, repeatedly moves one good chunk from the most-loaded
/// worker to the least-loaded worker until no move would bring either
/// side closer to the family average, preserving each chunk's overall
/// replication count (a move, never a plain delete). `estimate_only`
/// stops after producing the plan without running any `MoveReplicaJob`.
pub struct RebalanceJob {
    pub base: JobBase,
    pub family: DatabaseFamily,
    pub estimate_only: bool,
    pub max_concurrent_per_worker: usize,
    plan: Mutex<Vec<RebalancePlanEntry>>,
}

impl RebalanceJob {
    pub fn new(controller_id: ControllerId, parent_job_id: Option<JobId>, priority: i32, family: DatabaseFamily, estimate_only: bool, max_concurrent_per_worker: usize) -> Self {
        Self {
            base: JobBase::new("REBALANCE", controller_id, parent_job_id, priority),
            family,
            estimate_only,
            max_concurrent_per_worker,
            plan: Mutex::new(Vec::new()),
        }
    }

    pub fn plan(&self) -> Vec<RebalancePlanEntry> {
        self.plan.lock().clone()
    }

    pub fn run(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        self.base.start(ctx)?;

        let find_all = FindAllJob::new(self.base.controller_id, Some(self.base.id()), self.base.priority, self.family.clone(), true, false);
        if find_all.run(ctx)? != ExtendedState::Success {
            return self.base.finish(ctx, ExtendedState::Failed);
        }
        let data = find_all.replica_data();

        let mut loads = data.good_chunk_counts();
        if loads.len() < 2 {
            return self.base.finish(ctx, ExtendedState::Success);
        }
        let total: u32 = loads.values().sum();
        let avg = total / loads.len() as u32;

        let known: BTreeSet<String> = planner::known_workers(&data.workers).cloned().collect();

        let mut good_by_chunk: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
        for chunk in data.all_chunks() {
            let set = data.is_good.get(&chunk).into_iter().flat_map(|m| m.iter()).filter(|(_, v)| **v).map(|(w, _)| w.clone()).collect();
            good_by_chunk.insert(chunk, set);
        }

        let mut plan = Vec::new();
        loop {
            let workers: Vec<String> = loads.keys().filter(|w| known.contains(*w)).cloned().collect();
            let Some(hot) = planner::most_loaded(workers.iter(), &loads) else { break };
            let Some(cold) = planner::least_loaded(workers.iter(), &loads) else { break };
            if hot == cold {
                break;
            }
            let hot_load = loads[&hot];
            let cold_load = loads[&cold];
            if hot_load <= avg || cold_load >= avg || hot_load <= cold_load + 1 {
                break;
            }
            let candidate = good_by_chunk.iter().find(|(_, set)| set.contains(&hot) && !set.contains(&cold)).map(|(c, _)| *c);
            let Some(chunk) = candidate else { break };

            plan.push(RebalancePlanEntry { chunk, source_worker: hot.clone(), destination_worker: cold.clone() });
            good_by_chunk.get_mut(&chunk).unwrap().remove(&hot);
            good_by_chunk.get_mut(&chunk).unwrap().insert(cold.clone());
            *loads.get_mut(&hot).unwrap() -= 1;
            *loads.get_mut(&cold).unwrap() += 1;
        }

        *self.plan.lock() = plan.clone();

        if self.estimate_only || plan.is_empty() {
            return self.base.finish(ctx, ExtendedState::Success);
        }

        let mut by_dest: BTreeMap<String, Vec<RebalancePlanEntry>> = BTreeMap::new();
        for entry in plan {
            by_dest.entry(entry.destination_worker.clone()).or_default().push(entry);
        }

        let any_failed = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for entries in by_dest.values() {
                let queue = Mutex::new(VecDeque::from(entries.clone()));
                let num_workers = self.max_concurrent_per_worker.max(1).min(entries.len());
                for _ in 0..num_workers {
                    let queue = &queue;
                    let any_failed = &any_failed;
                    scope.spawn(move || loop {
                        let entry = queue.lock().pop_front();
                        let Some(entry) = entry else { break };
                        let mv = MoveReplicaJob::new(
                            self.base.controller_id,
                            Some(self.base.id()),
                            self.base.priority,
                            self.family.clone(),
                            entry.chunk,
                            entry.source_worker.clone(),
                            entry.destination_worker.clone(),
                            true,
                        );
                        match mv.run(ctx) {
                            Ok(ExtendedState::Success) => {}
                            _ => any_failed.store(true, Ordering::Relaxed),
                        }
                    });
                }
            }
        });

        self.base.finish(ctx, if any_failed.load(Ordering::Relaxed) { ExtendedState::Failed } else { ExtendedState::Success })
    }
}
