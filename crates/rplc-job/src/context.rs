use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rplc_messenger::Messenger;
use rplc_request::Request;
use rplc_services::{ChunkLockRegistry, DatabaseServices};
use rplc_types::{Clock, ControllerId, JobId};

use crate::error::JobError;

/// The dependency bundle every Job needs, threaded through as a plain
/// reference rather than captured into each Job struct (spec.md §9's
/// arena-by-id guidance applied one layer up: Jobs own their Requests by
/// id, and in turn take a borrowed `JobContext` rather than holding their
/// own copies of the Messenger/Services/clock).
///
/// Job execution runs on an ordinary thread: a Job's `run` method calls
/// [`JobContext::execute_request`], which hands the built message to the
/// [`Messenger`] and blocks on the reply channel. There is no second
/// event loop inside this crate — the only non-blocking reactors in the
/// system are the Messenger's and the worker's (spec.md §5's "Controller
/// worker pool executing Job and Request callbacks").
pub struct JobContext {
    pub services: Arc<dyn DatabaseServices>,
    pub messenger: Arc<Messenger>,
    pub chunk_locks: Arc<ChunkLockRegistry>,
    pub clock: Arc<dyn Clock>,
    pub worker_addrs: HashMap<String, SocketAddr>,
    pub instance_id: String,
    pub request_timeout: Duration,
    pub controller_id: ControllerId,
}

impl JobContext {
    pub fn worker_addr(&self, worker: &str) -> Result<SocketAddr, JobError> {
        self.worker_addrs.get(worker).copied().ok_or_else(|| JobError::UnknownWorker(worker.to_string()))
    }

    pub fn known_workers(&self) -> Vec<String> {
        self.worker_addrs.keys().cloned().collect()
    }

    /// Drives one [`Request`] end to end: builds its wire message, submits
    /// it to the Messenger, blocks for the reply (or the request timeout),
    /// and feeds the outcome to `analyze` (spec.md §4.2). Returns the
    /// extended state reached; a request left `IN_PROGRESS` by
    /// keep-tracking never happens here since every Job-issued request has
    /// `keep_tracking=false`.
    pub fn execute_request(&self, request: &Request, job_id: Option<JobId>) -> Result<rplc_request::ExtendedState, JobError> {
        let addr = self.worker_addr(&request.worker)?;
        let message = request.build_message(self.request_timeout, &self.instance_id);
        request.mark_sent(job_id, self.clock.now(), self.services.as_ref())?;

        let send_result = self.messenger.send(&request.worker, addr, request.id.to_string(), &message, Some(self.request_timeout));
        let rx = match send_result {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(request_id = %request.id, worker = %request.worker, error = %e, "failed to submit request to messenger");
                return Ok(request.analyze(job_id, false, None, self.clock.now(), self.services.as_ref())?);
            }
        };

        match rx.recv_timeout(self.request_timeout) {
            Ok(response) => Ok(request.analyze(job_id, true, Some(&response), self.clock.now(), self.services.as_ref())?),
            Err(_) => Ok(request.analyze(job_id, false, None, self.clock.now(), self.services.as_ref())?),
        }
    }
}
