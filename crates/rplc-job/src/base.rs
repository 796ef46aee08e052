use parking_lot::Mutex;

use rplc_services::{ControllerEvent, JobRecord};
use rplc_types::{JobId, Timestamp};

use crate::context::JobContext;
use crate::error::JobError;
use crate::state::{ExtendedState, PrimaryState};

type FinishCallback = Box<dyn FnOnce(JobId, ExtendedState) + Send>;

struct Inner {
    primary: PrimaryState,
    extended: ExtendedState,
    begin_time: Timestamp,
    end_time: Timestamp,
    heartbeat_time: Timestamp,
    callbacks: Vec<FinishCallback>,
}

/// Common Job state machine shared by every job type (spec.md §4.4): an
/// id, controller/parent identity, a priority, and the
/// `CREATED → IN_PROGRESS → FINISHED` primary states with a one-shot
/// `onFinish` notification, mirroring [`rplc_request::Request`]'s own
/// finish/callback treatment one layer up the ownership tree.
pub struct JobBase {
    id: JobId,
    pub controller_id: rplc_types::ControllerId,
    pub parent_job_id: Option<JobId>,
    pub job_type: &'static str,
    pub priority: i32,
    span: tracing::Span,
    inner: Mutex<Inner>,
}

impl JobBase {
    pub fn new(
        job_type: &'static str,
        controller_id: rplc_types::ControllerId,
        parent_job_id: Option<JobId>,
        priority: i32,
    ) -> Self {
        let id = JobId::new();
        let span = tracing::info_span!("job", job_id = %id, r#type = job_type);
        Self {
            id,
            controller_id,
            parent_job_id,
            job_type,
            priority,
            span,
            inner: Mutex::new(Inner {
                primary: PrimaryState::Created,
                extended: ExtendedState::None,
                begin_time: Timestamp::UNSET,
                end_time: Timestamp::UNSET,
                heartbeat_time: Timestamp::UNSET,
                callbacks: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn primary_state(&self) -> PrimaryState {
        self.inner.lock().primary
    }

    pub fn extended_state(&self) -> ExtendedState {
        self.inner.lock().extended
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().primary == PrimaryState::Finished
    }

    /// Registers a callback fired exactly once, the instant this job
    /// enters `FINISHED`. Already-finished jobs run the callback inline.
    pub fn on_finish(&self, callback: impl FnOnce(JobId, ExtendedState) + Send + 'static) {
        let mut inner = self.inner.lock();
        if inner.primary == PrimaryState::Finished {
            let extended = inner.extended;
            drop(inner);
            callback(self.id, extended);
        } else {
            inner.callbacks.push(Box::new(callback));
        }
    }

    /// `start()` (spec.md §4.4): transitions `CREATED → IN_PROGRESS` and
    /// writes the initial [`JobRecord`]. Chunk-lock acquisition is the
    /// caller's responsibility (each job type knows which chunks it needs).
    pub fn start(&self, ctx: &JobContext) -> Result<(), JobError> {
        let _guard = self.span.enter();
        let now = ctx.clock.now();
        {
            let mut inner = self.inner.lock();
            if inner.primary != PrimaryState::Created {
                return Ok(());
            }
            inner.primary = PrimaryState::InProgress;
            inner.begin_time = now;
            inner.heartbeat_time = now;
        }
        ctx.services.save_job(&self.to_record())?;
        tracing::info!(job_id = %self.id, job_type = self.job_type, state = %PrimaryState::InProgress, "job started");
        Ok(())
    }

    /// Refreshes the liveness heartbeat (spec.md §6's `job.heartbeatTime`).
    pub fn heartbeat(&self, ctx: &JobContext) -> Result<(), JobError> {
        let now = ctx.clock.now();
        self.inner.lock().heartbeat_time = now;
        ctx.services.update_heartbeat_time(self.id, now)?;
        Ok(())
    }

    /// One-shot terminal transition (spec.md §4.4's "on completion, it
    /// invokes its `onFinish` callback and notifies waiters"). Persists the
    /// final [`JobRecord`], logs a `tracing` event plus a `controller_event`
    /// row (SPEC_FULL.md §4.4's ambient addition), and fires every
    /// registered callback exactly once.
    pub fn finish(&self, ctx: &JobContext, extended: ExtendedState) -> Result<ExtendedState, JobError> {
        let _guard = self.span.enter();
        let now = ctx.clock.now();
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.primary == PrimaryState::Finished {
                return Ok(inner.extended);
            }
            inner.primary = PrimaryState::Finished;
            inner.extended = extended;
            inner.end_time = now;
            std::mem::take(&mut inner.callbacks)
        };

        ctx.services.save_job(&self.to_record())?;

        let event = ControllerEvent {
            id: 0,
            controller_id: self.controller_id,
            timestamp: now,
            task: self.job_type.to_string(),
            operation: "FINISH".to_string(),
            status: extended.to_string(),
            request_id: None,
            job_id: Some(self.id),
            kv: Vec::new(),
        };
        ctx.services.log_controller_event(&event)?;

        if matches!(extended, ExtendedState::Failed | ExtendedState::ConfigError) {
            tracing::warn!(job_id = %self.id, job_type = self.job_type, extended_state = %extended, "job finished");
        } else {
            tracing::info!(job_id = %self.id, job_type = self.job_type, extended_state = %extended, "job finished");
        }

        for callback in callbacks {
            callback(self.id, extended);
        }
        Ok(extended)
    }

    /// `cancel()` (spec.md §5): enters `FINISHED/CANCELLED` without
    /// blocking. Cancelling owned Requests/child Jobs is the caller's
    /// responsibility since `JobBase` does not track them generically.
    pub fn cancel(&self, ctx: &JobContext) -> Result<ExtendedState, JobError> {
        self.finish(ctx, ExtendedState::Cancelled)
    }

    fn to_record(&self) -> JobRecord {
        let inner = self.inner.lock();
        JobRecord {
            id: self.id,
            controller_id: self.controller_id,
            parent_job_id: self.parent_job_id,
            job_type: self.job_type.to_string(),
            state: inner.primary.to_string(),
            extended_state: inner.extended.to_string(),
            begin_time: inner.begin_time,
            end_time: inner.end_time,
            heartbeat_time: inner.heartbeat_time,
            priority: self.priority,
            kv: Vec::new(),
        }
    }
}
