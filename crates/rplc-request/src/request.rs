use parking_lot::Mutex;

use rplc_services::{DatabaseServices, RequestRecord};
use rplc_types::{RequestId, ServerPerformance, Timestamp};
use rplc_wire::{RequestHeader, RequestMessage, Response, ResponseStatus};

use crate::error::RequestError;
use crate::operation::{Operation, RequestResult};
use crate::state::{ExtendedState, PrimaryState};

type FinishCallback = Box<dyn FnOnce(RequestId, ExtendedState, Option<RequestResult>) + Send>;

struct Inner {
    primary: PrimaryState,
    extended: ExtendedState,
    controller_create_time: Timestamp,
    controller_start_time: Timestamp,
    controller_finish_time: Timestamp,
    worker_performance: ServerPerformance,
    result: Option<RequestResult>,
    tracking_deadline: Option<Timestamp>,
    expiration_deadline: Option<Timestamp>,
    callbacks: Vec<FinishCallback>,
}

/// Client-side state machine for a single worker operation (spec.md §4.2).
///
/// `CREATED → IN_PROGRESS → FINISHED`, never moving back out of `FINISHED`.
/// Held in an arena map keyed by [`RequestId`] rather than referenced by
/// shared pointer from its owning Job (spec.md §9's design note); a
/// `tracing::Span` tagged with `request_id`/`type`/`worker` is entered for
/// every state transition, mirroring `kimberlite-server::connection`'s
/// per-connection span.
pub struct Request {
    pub id: RequestId,
    pub worker: String,
    pub priority: i32,
    pub keep_tracking: bool,
    pub operation: Operation,
    span: tracing::Span,
    inner: Mutex<Inner>,
}

impl Request {
    pub fn new(worker: impl Into<String>, priority: i32, keep_tracking: bool, operation: Operation, now: Timestamp) -> Self {
        let id = RequestId::new();
        let worker = worker.into();
        let span = tracing::info_span!("request", request_id = %id, r#type = operation.name(), worker = %worker);
        Self {
            id,
            worker,
            priority,
            keep_tracking,
            operation,
            span,
            inner: Mutex::new(Inner {
                primary: PrimaryState::Created,
                extended: ExtendedState::None,
                controller_create_time: now,
                controller_start_time: Timestamp::UNSET,
                controller_finish_time: Timestamp::UNSET,
                worker_performance: ServerPerformance::default(),
                result: None,
                tracking_deadline: None,
                expiration_deadline: None,
                callbacks: Vec::new(),
            }),
        }
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

    pub fn result(&self) -> Option<RequestResult> {
        self.inner.lock().result.clone()
    }

    /// Registers a callback fired exactly once, the instant this request
    /// enters `FINISHED` (spec.md §8's one-shot-callback invariant). If the
    /// request has already finished, the callback runs immediately.
    pub fn on_finish(&self, callback: impl FnOnce(RequestId, ExtendedState, Option<RequestResult>) + Send + 'static) {
        let mut inner = self.inner.lock();
        if inner.primary == PrimaryState::Finished {
            let extended = inner.extended;
            let result = inner.result.clone();
            drop(inner);
            callback(self.id, extended, result);
        } else {
            inner.callbacks.push(Box::new(callback));
        }
    }

    /// Builds the framed message handed to the [`rplc_messenger::Messenger`].
    pub fn build_message(&self, timeout: std::time::Duration, instance_id: &str) -> RequestMessage {
        let header = RequestHeader {
            id: self.id.to_string(),
            kind: self.operation.wire_kind(),
            queued_type: self.operation.queued_type(),
            management_type: self.operation.management_type(),
            priority: self.priority,
            timeout: u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX),
            instance_id: instance_id.to_string(),
        };
        RequestMessage { header, body: self.operation.build_body() }
    }

    /// Transitions `CREATED → IN_PROGRESS` once the message has been handed
    /// to the messenger, and, for persisted operations, records the
    /// initial [`RequestRecord`].
    pub fn mark_sent(&self, job_id: Option<rplc_types::JobId>, now: Timestamp, services: &dyn DatabaseServices) -> Result<(), RequestError> {
        let _guard = self.span.enter();
        {
            let mut inner = self.inner.lock();
            if inner.primary != PrimaryState::Created {
                return Ok(());
            }
            inner.primary = PrimaryState::InProgress;
            inner.controller_start_time = now;
        }
        if self.operation.is_persisted() {
            services.save_request(&self.to_record(job_id))?;
        }
        tracing::debug!("request sent");
        Ok(())
    }

    fn to_record(&self, job_id: Option<rplc_types::JobId>) -> RequestRecord {
        let inner = self.inner.lock();
        RequestRecord {
            id: self.id,
            job_id,
            name: self.operation.name().to_string(),
            worker: self.worker.clone(),
            priority: self.priority,
            state: inner.primary.to_string(),
            extended_state: inner.extended.to_string(),
            server_status: None,
            controller_create_time: inner.controller_create_time,
            controller_start_time: inner.controller_start_time,
            controller_finish_time: inner.controller_finish_time,
            worker_receive_time: inner.worker_performance.receive_time,
            worker_start_time: inner.worker_performance.start_time,
            worker_finish_time: inner.worker_performance.finish_time,
            kv: Vec::new(),
        }
    }

    /// `analyze` (spec.md §4.2, precise algorithm). Returns the extended
    /// state reached; if the request is still `IN_PROGRESS` afterward (a
    /// keep-tracking give-up state), the caller should schedule `wait()`.
    pub fn analyze(
        &self,
        job_id: Option<rplc_types::JobId>,
        success: bool,
        response: Option<&Response>,
        now: Timestamp,
        services: &dyn DatabaseServices,
    ) -> Result<ExtendedState, RequestError> {
        let _guard = self.span.enter();

        if !success {
            return self.finish(job_id, ExtendedState::ClientError, None, now, services);
        }
        let response = response.ok_or(RequestError::MissingResponse)?;

        {
            let mut inner = self.inner.lock();
            inner.worker_performance = response.effective_performance();
        }

        match response.status {
            ResponseStatus::Success => {
                let result = self.extract_result(response);
                self.persist_catalog_effects(response, services)?;
                self.finish(job_id, ExtendedState::Success, Some(result), now, services)
            }
            ResponseStatus::Created => self.give_up_or_track(job_id, ExtendedState::ServerCreated, now, services),
            ResponseStatus::Queued => self.give_up_or_track(job_id, ExtendedState::ServerQueued, now, services),
            ResponseStatus::InProgress => self.give_up_or_track(job_id, ExtendedState::ServerInProgress, now, services),
            ResponseStatus::IsCancelling => self.give_up_or_track(job_id, ExtendedState::ServerIsCancelling, now, services),
            ResponseStatus::Bad => self.finish(job_id, ExtendedState::ServerBad, None, now, services),
            ResponseStatus::Failed => self.finish(job_id, ExtendedState::ServerError, None, now, services),
            ResponseStatus::Cancelled => self.finish(job_id, ExtendedState::ServerCancelled, None, now, services),
        }
    }

    /// Applies keep-tracking: if set, the request stays `IN_PROGRESS` and
    /// the caller is expected to have `wait()` rescheduled via
    /// `due_for_tracking`; otherwise it finishes with the give-up extended
    /// state (spec.md §4.2).
    fn give_up_or_track(
        &self,
        job_id: Option<rplc_types::JobId>,
        give_up_state: ExtendedState,
        now: Timestamp,
        services: &dyn DatabaseServices,
    ) -> Result<ExtendedState, RequestError> {
        if self.keep_tracking {
            Ok(ExtendedState::None)
        } else {
            self.finish(job_id, give_up_state, None, now, services)
        }
    }

    fn extract_result(&self, response: &Response) -> RequestResult {
        match &self.operation {
            Operation::Replicate { .. } | Operation::Delete { .. } | Operation::Find { .. } => {
                response.replica.clone().map(RequestResult::Replica).unwrap_or(RequestResult::None)
            }
            Operation::FindAll { .. } => {
                response.replicas.clone().map(RequestResult::Replicas).unwrap_or(RequestResult::None)
            }
            Operation::Echo { .. } => response.echo_data.clone().map(RequestResult::Echo).unwrap_or(RequestResult::None),
            Operation::StatusOf { .. } | Operation::StopOf { .. } => RequestResult::TrackedStatus { status: response.status },
        }
    }

    /// For Find/FindAll/Replicate/Delete, a successful reply's `ReplicaInfo`
    /// is written through to the catalog (spec.md §4.2's `analyze` bullet
    /// for `Find*`; Replicate/Delete extend the same treatment since their
    /// success result is likewise a `ReplicaInfo` the catalog must reflect).
    fn persist_catalog_effects(&self, response: &Response, services: &dyn DatabaseServices) -> Result<(), RequestError> {
        match &self.operation {
            Operation::Find { .. } | Operation::Replicate { .. } | Operation::Delete { .. } => {
                if let Some(replica) = &response.replica {
                    services.save_replica_info(replica)?;
                }
            }
            Operation::FindAll { database, save_replica_info } if *save_replica_info => {
                if let Some(replicas) = response.replicas.clone() {
                    services.save_replica_info_collection(&self.worker, database, replicas)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Schedules the next tracking timer fire (spec.md §4.2's `wait`).
    pub fn schedule_tracking(&self, deadline: Timestamp) {
        self.inner.lock().tracking_deadline = Some(deadline);
    }

    /// Whether the per-request tracking timer (`T_track`) is due, per
    /// spec.md §4.2's `awaken`.
    pub fn tracking_due(&self, now: Timestamp) -> bool {
        let inner = self.inner.lock();
        inner.primary == PrimaryState::InProgress && inner.tracking_deadline.is_some_and(|d| now >= d)
    }

    /// Builds the `REQUEST_TRACK` message re-sent on a tracking timer fire.
    pub fn build_track_message(&self, instance_id: &str) -> RequestMessage {
        let target_queued_type = self.operation.queued_type().expect("tracking only applies to queued operations");
        let track = Operation::StatusOf { target_id: self.id, target_queued_type };
        let header = RequestHeader {
            id: rplc_types::RequestId::new().to_string(),
            kind: track.wire_kind(),
            queued_type: track.queued_type(),
            management_type: track.management_type(),
            priority: self.priority,
            timeout: 0,
            instance_id: instance_id.to_string(),
        };
        RequestMessage { header, body: track.build_body() }
    }

    /// Sets the per-request expiration deadline (spec.md §4.2).
    pub fn schedule_expiration(&self, deadline: Timestamp) {
        self.inner.lock().expiration_deadline = Some(deadline);
    }

    pub fn expiration_due(&self, now: Timestamp) -> bool {
        let inner = self.inner.lock();
        inner.primary != PrimaryState::Finished && inner.expiration_deadline.is_some_and(|d| now >= d)
    }

    /// Fires on expiration timer: acts as `cancel()` but sets
    /// `TIMEOUT_EXPIRED` instead of `CANCELLED` (spec.md §4.2).
    pub fn expire(&self, job_id: Option<rplc_types::JobId>, now: Timestamp, services: &dyn DatabaseServices) -> Result<ExtendedState, RequestError> {
        self.finish(job_id, ExtendedState::TimeoutExpired, None, now, services)
    }

    /// `cancel()` (spec.md §4.2): cancels the tracking/expiration timers
    /// and enters `FINISHED/CANCELLED`. Sending the best-effort Stop
    /// management message and cancelling the messenger entry is the
    /// caller's responsibility (it needs the `Messenger` handle, which
    /// `Request` itself does not hold, per spec.md §9's arena-by-id
    /// design).
    pub fn cancel(&self, job_id: Option<rplc_types::JobId>, now: Timestamp, services: &dyn DatabaseServices) -> Result<ExtendedState, RequestError> {
        self.finish(job_id, ExtendedState::Cancelled, None, now, services)
    }

    /// `CONFIG_ERROR` short-circuit finish, used when a request's inputs
    /// fail validation before it is ever sent (e.g. an unknown worker).
    pub fn fail_config(&self, job_id: Option<rplc_types::JobId>, now: Timestamp, services: &dyn DatabaseServices) -> Result<ExtendedState, RequestError> {
        self.finish(job_id, ExtendedState::ConfigError, None, now, services)
    }

    fn finish(
        &self,
        job_id: Option<rplc_types::JobId>,
        extended: ExtendedState,
        result: Option<RequestResult>,
        now: Timestamp,
        services: &dyn DatabaseServices,
    ) -> Result<ExtendedState, RequestError> {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.primary == PrimaryState::Finished {
                return Ok(inner.extended);
            }
            inner.primary = PrimaryState::Finished;
            inner.extended = extended;
            inner.result = result.clone();
            inner.controller_finish_time = now;
            inner.tracking_deadline = None;
            inner.expiration_deadline = None;
            std::mem::take(&mut inner.callbacks)
        };

        if self.operation.is_persisted() {
            services.save_request(&self.to_record(job_id))?;
        }

        if matches!(extended, ExtendedState::ServerError | ExtendedState::ClientError | ExtendedState::ServerBad) {
            tracing::warn!(extended_state = %extended, "request finished unsuccessfully");
        } else {
            tracing::info!(extended_state = %extended, "request finished");
        }

        for callback in callbacks {
            callback(self.id, extended, result.clone());
        }
        Ok(extended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rplc_services::MemoryDatabaseServices;
    use rplc_types::{Replica, ReplicaStatus};
    use rplc_wire::ResponseStatusExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn sample_response(status: ResponseStatus) -> Response {
        Response {
            id: "x".into(),
            status,
            status_ext: ResponseStatusExt::None,
            performance: ServerPerformance::default(),
            target_performance: None,
            replica: Some(Replica {
                worker: "w1".into(),
                database: "db".into(),
                chunk: 1,
                status: ReplicaStatus::Complete,
                verify_time: Timestamp::from_millis(1),
                files: Vec::new(),
            }),
            replicas: None,
            echo_data: None,
        }
    }

    #[test]
    fn success_reply_finishes_and_persists_replica() {
        let services = MemoryDatabaseServices::new();
        let req = Request::new(
            "w1",
            0,
            false,
            Operation::Find { database: "db".into(), chunk: 1, compute_check_sum: true },
            Timestamp::from_millis(1),
        );
        let response = sample_response(ResponseStatus::Success);
        let outcome = req.analyze(None, true, Some(&response), Timestamp::from_millis(2), &services).unwrap();
        assert_eq!(outcome, ExtendedState::Success);
        assert_eq!(req.primary_state(), PrimaryState::Finished);
        let found = services.find_replicas("db", 1, false).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn transport_failure_is_client_error() {
        let services = MemoryDatabaseServices::new();
        let req = Request::new("w1", 0, false, Operation::Echo { data: "hi".into(), delay_ms: 0 }, Timestamp::from_millis(1));
        let outcome = req.analyze(None, false, None, Timestamp::from_millis(2), &services).unwrap();
        assert_eq!(outcome, ExtendedState::ClientError);
    }

    #[test]
    fn on_finish_fires_exactly_once() {
        let services = MemoryDatabaseServices::new();
        let req = Request::new("w1", 0, false, Operation::Echo { data: "hi".into(), delay_ms: 0 }, Timestamp::from_millis(1));
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        req.on_finish(move |_, _, _| {
            assert!(!fired2.swap(true, Ordering::SeqCst), "callback fired twice");
        });
        let response = sample_response(ResponseStatus::Success);
        req.analyze(None, true, Some(&response), Timestamp::from_millis(2), &services).unwrap();
        assert!(fired.load(Ordering::SeqCst));

        // Registering after finish runs immediately, still exactly once.
        let fired_late = Arc::new(AtomicBool::new(false));
        let fired_late2 = fired_late.clone();
        req.on_finish(move |_, _, _| fired_late2.store(true, Ordering::SeqCst));
        assert!(fired_late.load(Ordering::SeqCst));
    }

    #[test]
    fn keep_tracking_stays_in_progress_on_queued_status() {
        let services = MemoryDatabaseServices::new();
        let req = Request::new(
            "w1",
            0,
            true,
            Operation::Find { database: "db".into(), chunk: 1, compute_check_sum: false },
            Timestamp::from_millis(1),
        );
        let response = sample_response(ResponseStatus::Queued);
        let outcome = req.analyze(None, true, Some(&response), Timestamp::from_millis(2), &services).unwrap();
        assert_eq!(outcome, ExtendedState::None);
        assert_eq!(req.primary_state(), PrimaryState::InProgress);
    }

    #[test]
    fn cancel_is_one_shot_and_terminal() {
        let services = MemoryDatabaseServices::new();
        let req = Request::new("w1", 0, false, Operation::Echo { data: "hi".into(), delay_ms: 0 }, Timestamp::from_millis(1));
        let first = req.cancel(None, Timestamp::from_millis(2), &services).unwrap();
        assert_eq!(first, ExtendedState::Cancelled);
        // A second finish attempt (e.g. a stray late reply) must not
        // override the terminal state.
        let response = sample_response(ResponseStatus::Success);
        let second = req.analyze(None, true, Some(&response), Timestamp::from_millis(3), &services).unwrap();
        assert_eq!(second, ExtendedState::Cancelled);
    }
}
