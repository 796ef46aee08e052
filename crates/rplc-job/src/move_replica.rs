use rplc_types::{ControllerId, DatabaseFamily, JobId};

use crate::base::JobBase;
use crate::context::JobContext;
use crate::create_delete::{CreateReplicaJob, DeleteReplicaJob, NullChunkNotifier, QservChunkNotifier};
use crate::error::JobError;
use crate::state::ExtendedState;

/// MoveReplicaJob (spec.md §4.4.5): a CreateReplicaJob followed, if it
/// succeeds and `purge` is set, by a DeleteReplicaJob on the source
/// worker. Holds the chunk lock for the combined span of both children
/// (spec.md §5's "shortest span that covers all Requests for that chunk
/// within one Job" — here "one Job" is this move, not either child).
pub struct MoveReplicaJob {
    pub base: JobBase,
    pub family: DatabaseFamily,
    pub chunk: u32,
    pub source_worker: String,
    pub destination_worker: String,
    pub purge: bool,
}

impl MoveReplicaJob {
    pub fn new(
        controller_id: ControllerId,
        parent_job_id: Option<JobId>,
        priority: i32,
        family: DatabaseFamily,
        chunk: u32,
        source_worker: String,
        destination_worker: String,
        purge: bool,
    ) -> Self {
        Self {
            base: JobBase::new("MOVE_REPLICA", controller_id, parent_job_id, priority),
            family,
            chunk,
            source_worker,
            destination_worker,
            purge,
        }
    }

    fn preconditions_hold(&self, ctx: &JobContext) -> Result<bool, JobError> {
        if self.source_worker == self.destination_worker {
            return Ok(false);
        }
        let enabled = ctx.services.enabled_workers()?;
        Ok(enabled.contains(&self.source_worker) && enabled.contains(&self.destination_worker))
    }

    pub fn run(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        self.base.start(ctx)?;

        if !self.preconditions_hold(ctx)? {
            return self.base.finish(ctx, ExtendedState::ConfigError);
        }

        if !ctx.chunk_locks.try_acquire(&self.family.name, self.chunk, self.base.id()) {
            return self.base.finish(ctx, ExtendedState::Failed);
        }
        let outcome = self.run_locked(ctx);
        ctx.chunk_locks.release(&self.family.name, self.chunk, self.base.id());

        let extended = outcome?;
        self.base.finish(ctx, extended)
    }

    fn run_locked(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        let create = CreateReplicaJob::new(
            self.base.controller_id,
            Some(self.base.id()),
            self.base.priority,
            self.family.clone(),
            self.chunk,
            self.destination_worker.clone(),
            self.source_worker.clone(),
            false,
            Box::new(NullChunkNotifier) as Box<dyn QservChunkNotifier>,
        );
        let create_outcome = create.run(ctx)?;
        if create_outcome != ExtendedState::Success {
            return Ok(create_outcome);
        }
        if !self.purge {
            return Ok(create_outcome);
        }

        let delete = DeleteReplicaJob::new(
            self.base.controller_id,
            Some(self.base.id()),
            self.base.priority,
            self.family.clone(),
            self.chunk,
            self.source_worker.clone(),
            false,
            Box::new(NullChunkNotifier) as Box<dyn QservChunkNotifier>,
        );
        delete.run(ctx)
    }
}
