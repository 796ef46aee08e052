use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use rplc_types::{ServerPerformance, Timestamp};
use rplc_wire::{QueuedType, Response, ResponseStatus, ResponseStatusExt};

use crate::state::{ExtendedState, PrimaryState};

struct Inner {
    primary: PrimaryState,
    extended: ExtendedState,
    performance: ServerPerformance,
    replica: Option<rplc_types::Replica>,
    replicas: Option<Vec<rplc_types::Replica>>,
    echo_data: Option<String>,
    error: Option<String>,
}

/// Server-side counterpart of [`rplc_request::Request`] (spec.md §4.3):
/// executes one queued operation against this worker's POSIX replica
/// directory (or, for Replicate, against a peer worker's file-copy
/// service), and carries enough state for `execute()` to be called
/// repeatedly until it reports completion.
pub struct WorkerRequest {
    pub id: String,
    pub queued_type: QueuedType,
    pub instance_id: String,
    cancel: AtomicBool,
    inner: Mutex<Inner>,
}

impl WorkerRequest {
    pub fn new(id: String, queued_type: QueuedType, instance_id: String) -> Self {
        Self {
            id,
            queued_type,
            instance_id,
            cancel: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                primary: PrimaryState::Created,
                extended: ExtendedState::Queued,
                performance: ServerPerformance::default(),
                replica: None,
                replicas: None,
                echo_data: None,
                error: None,
            }),
        }
    }

    pub fn primary_state(&self) -> PrimaryState {
        self.inner.lock().primary
    }

    pub fn extended_state(&self) -> ExtendedState {
        self.inner.lock().extended
    }

    pub fn mark_received(&self, now: Timestamp) {
        let mut inner = self.inner.lock();
        inner.performance.receive_time = now;
    }

    pub fn mark_started(&self, now: Timestamp) {
        let mut inner = self.inner.lock();
        inner.primary = PrimaryState::InProgress;
        inner.extended = ExtendedState::InProgress;
        inner.performance.start_time = now;
    }

    /// Requests cooperative cancellation (spec.md §4.3). Checked by the
    /// operation implementations between files and between buffer reads.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        if inner.primary != PrimaryState::Finished {
            inner.extended = ExtendedState::IsCancelling;
        }
    }

    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn finish_success(&self, now: Timestamp, replica: Option<rplc_types::Replica>, replicas: Option<Vec<rplc_types::Replica>>, echo_data: Option<String>) {
        let mut inner = self.inner.lock();
        inner.primary = PrimaryState::Finished;
        inner.extended = ExtendedState::Success;
        inner.performance.finish_time = now;
        inner.replica = replica;
        inner.replicas = replicas;
        inner.echo_data = echo_data;
    }

    pub fn finish_failed(&self, now: Timestamp, error: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.primary = PrimaryState::Finished;
        inner.extended = ExtendedState::Failed;
        inner.performance.finish_time = now;
        inner.error = Some(error.into());
    }

    pub fn finish_cancelled(&self, now: Timestamp) {
        let mut inner = self.inner.lock();
        inner.primary = PrimaryState::Finished;
        inner.extended = ExtendedState::Cancelled;
        inner.performance.finish_time = now;
    }

    pub fn finish_bad(&self, now: Timestamp, error: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.primary = PrimaryState::Finished;
        inner.extended = ExtendedState::Bad;
        inner.performance.finish_time = now;
        inner.error = Some(error.into());
    }

    pub fn to_response(&self) -> Response {
        let inner = self.inner.lock();
        Response {
            id: self.id.clone(),
            status: ResponseStatus::from(inner.extended),
            status_ext: if inner.error.is_some() { ResponseStatusExt::InvalidParam } else { ResponseStatusExt::None },
            performance: inner.performance,
            target_performance: None,
            replica: inner.replica.clone(),
            replicas: inner.replicas.clone(),
            echo_data: inner.echo_data.clone(),
        }
    }
}
