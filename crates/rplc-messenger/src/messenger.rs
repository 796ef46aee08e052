use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};

use rplc_wire::{Frame, Response};

use crate::backoff::{Backoff, RetryGate};
use crate::connection::WorkerConnection;
use crate::error::MessengerError;
use crate::registry::PendingRegistry;

const WAKER_TOKEN: Token = Token(usize::MAX);
const POLL_IDLE_TIMEOUT: Duration = Duration::from_millis(250);

/// A submission handed to the event-loop thread over the control channel.
enum Control {
    Send {
        worker: String,
        addr: SocketAddr,
        request_id: String,
        body: Vec<u8>,
        deadline: Option<Instant>,
        reply_to: Sender<Response>,
    },
    Cancel {
        request_id: String,
    },
    Shutdown,
}

/// Client-side transport to the worker fleet (spec.md §4.1).
///
/// One background thread runs a single `mio` event loop multiplexing every
/// worker connection and every in-flight request across them. Callers
/// submit requests via [`Messenger::send`], which hands a pre-encoded
/// frame to the loop over a control channel and returns a `Receiver` the
/// caller blocks on (or polls) for the reply. There is no async runtime:
/// the loop is a single non-blocking reactor thread, matching the
/// teacher's worker-side event loop design.
pub struct Messenger {
    control: Sender<Control>,
    waker: Arc<Waker>,
    handle: Option<JoinHandle<()>>,
    next_request_seq: AtomicUsize,
}

impl Messenger {
    pub fn start() -> Result<Self, MessengerError> {
        let poll = Poll::new().map_err(|e| MessengerError::Io { worker: "<poll>".into(), source: e })?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).map_err(|e| MessengerError::Io { worker: "<waker>".into(), source: e })?);
        let (control_tx, control_rx) = channel();
        let registry = Arc::new(PendingRegistry::new());

        let loop_waker = waker.clone();
        let loop_registry = registry.clone();
        let handle = std::thread::Builder::new()
            .name("rplc-messenger".to_string())
            .spawn(move || run_event_loop(poll, control_rx, loop_waker, loop_registry))
            .expect("failed to spawn messenger event loop thread");

        Ok(Self {
            control: control_tx,
            waker,
            handle: Some(handle),
            next_request_seq: AtomicUsize::new(0),
        })
    }

    /// Mints a request id unique to this messenger instance. Callers that
    /// already carry a [`rplc_types::RequestId`] should use its `Display`
    /// string instead; this exists for components (e.g. management
    /// messages) that only need local uniqueness.
    pub fn next_local_id(&self) -> String {
        format!("local-{}", self.next_request_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Submits a pre-built request body to `worker` at `addr`, returning a
    /// `Receiver` that yields the worker's [`Response`] once it arrives
    /// (or nothing if the request times out or is cancelled first).
    pub fn send<T: serde::Serialize>(
        &self,
        worker: &str,
        addr: SocketAddr,
        request_id: String,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<Receiver<Response>, MessengerError> {
        let encoded = Frame::encode(body)?;
        let (reply_to, reply_rx) = channel();
        let deadline = timeout.map(|d| Instant::now() + d);
        self.control
            .send(Control::Send {
                worker: worker.to_string(),
                addr,
                request_id,
                body: encoded,
                deadline,
                reply_to,
            })
            .map_err(|_| MessengerError::Closed)?;
        self.waker.wake().map_err(|e| MessengerError::Io { worker: worker.to_string(), source: e })?;
        Ok(reply_rx)
    }

    /// Cancels a pending request. A reply that is already in flight on the
    /// wire may still be read and silently discarded.
    pub fn cancel(&self, request_id: impl Into<String>) -> Result<(), MessengerError> {
        self.control.send(Control::Cancel { request_id: request_id.into() }).map_err(|_| MessengerError::Closed)?;
        self.waker.wake().map_err(|e| MessengerError::Io { worker: "<cancel>".into(), source: e })
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Shutdown);
        let _ = self.waker.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct WorkerSlot {
    addr: SocketAddr,
    token: Token,
    connection: Option<WorkerConnection>,
    retry: RetryGate,
}

fn run_event_loop(mut poll: Poll, control_rx: Receiver<Control>, _waker: Arc<Waker>, registry: Arc<PendingRegistry>) {
    let mut events = Events::with_capacity(256);
    let mut workers: HashMap<String, WorkerSlot> = HashMap::new();
    let mut next_token = 0usize;

    'outer: loop {
        let timeout = next_poll_timeout(&registry);
        if let Err(e) = poll.poll(&mut events, Some(timeout)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!(error = %e, "messenger poll failed");
            break;
        }

        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            if let Some((worker, slot)) = workers.iter_mut().find(|(_, s)| s.token == event.token()) {
                service_connection(worker, slot, &registry);
            }
        }

        while let Ok(control) = control_rx.try_recv() {
            match control {
                Control::Shutdown => break 'outer,
                Control::Cancel { request_id } => {
                    registry.cancel(&request_id);
                }
                Control::Send { worker, addr, request_id, body, deadline, reply_to } => {
                    registry.insert(request_id, worker.clone(), reply_to, deadline);
                    let slot = workers.entry(worker.clone()).or_insert_with(|| {
                        let token = Token(next_token);
                        next_token += 1;
                        WorkerSlot {
                            addr,
                            token,
                            connection: None,
                            retry: RetryGate::new(Backoff::default(), Instant::now()),
                        }
                    });
                    ensure_connected(&worker, slot, &poll);
                    if let Some(conn) = slot.connection.as_mut() {
                        let _ = conn.enqueue_raw(body);
                        let _ = poll.registry().reregister(&mut conn.stream, conn.token, conn.interest());
                    }
                }
            }
        }

        let expired = registry.expire_due(Instant::now());
        for id in expired {
            tracing::debug!(request_id = %id, "request expired without a reply");
        }
    }
}

fn next_poll_timeout(registry: &PendingRegistry) -> Duration {
    match registry.next_deadline() {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(POLL_IDLE_TIMEOUT),
        None => POLL_IDLE_TIMEOUT,
    }
}

fn ensure_connected(worker: &str, slot: &mut WorkerSlot, poll: &Poll) {
    if slot.connection.is_some() {
        return;
    }
    if !slot.retry.is_ready(Instant::now()) {
        return;
    }
    match TcpStream::connect(slot.addr) {
        Ok(mut stream) => {
            if poll.registry().register(&mut stream, slot.token, Interest::READABLE | Interest::WRITABLE).is_ok() {
                slot.connection = Some(WorkerConnection::new(slot.token, stream));
                slot.retry.record_success();
            }
        }
        Err(e) => {
            tracing::warn!(worker, error = %e, "failed to connect to worker");
            slot.retry.record_failure(Instant::now());
        }
    }
}

fn service_connection(worker: &str, slot: &mut WorkerSlot, registry: &PendingRegistry) {
    let Some(conn) = slot.connection.as_mut() else { return };

    if let Err(e) = conn.drain_writes() {
        tracing::warn!(worker, error = %e, "write failed, dropping connection");
        slot.connection = None;
        slot.retry.record_failure(Instant::now());
        for id in registry.drop_worker(worker) {
            tracing::debug!(request_id = %id, worker, "dropped pending request on connection reset");
        }
        return;
    }

    match conn.fill_read_buf() {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            slot.connection = None;
            slot.retry.record_failure(Instant::now());
            for id in registry.drop_worker(worker) {
                tracing::debug!(request_id = %id, worker, "dropped pending request on connection reset");
            }
            return;
        }
    }

    match conn.decode_ready::<Response>() {
        Ok(responses) => {
            for response in responses {
                registry.resolve(response);
            }
        }
        Err(e) => tracing::warn!(worker, error = %e, "failed to decode worker response"),
    }
}
