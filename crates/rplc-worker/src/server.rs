//! The worker's non-blocking request/response service (spec.md §4.3,
//! SPEC_FULL.md §4.3's `mio` addition). One reactor thread accepts
//! connections and multiplexes frame I/O exactly like
//! [`rplc_messenger::Messenger`]'s client-side loop; parsed requests are
//! handed off to a fixed-size worker-local thread pool that calls the
//! [`crate::operations`] functions and reports back over a channel.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::BytesMut;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;

use rplc_types::{ServerPerformance, Timestamp};
use rplc_wire::{Frame, QueuedType, RequestBody, RequestKind, RequestMessage, ResponseStatus, ResponseStatusExt};

use crate::config::WorkerConfig;
use crate::file_protocol::TcpPeerFileSource;
use crate::operations;
use crate::queue::RequestQueue;
use crate::request::WorkerRequest;

const WAKER_TOKEN: Token = Token(usize::MAX);
const LISTENER_TOKEN: Token = Token(usize::MAX - 1);
const POLL_TIMEOUT: Duration = Duration::from_millis(250);
const IDLE_POP_BACKOFF: Duration = Duration::from_millis(5);

struct JobMeta {
    body: RequestBody,
    token: Token,
    timeout: u32,
}

struct ServerConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_queue: VecDeque<u8>,
}

impl ServerConnection {
    fn new(stream: TcpStream) -> Self {
        Self { stream, read_buf: BytesMut::with_capacity(64 * 1024), write_queue: VecDeque::new() }
    }

    fn fill_read_buf(&mut self) -> io::Result<bool> {
        let mut temp = [0u8; 4096];
        loop {
            match self.stream.read(&mut temp) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&temp[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn drain_writes(&mut self) -> io::Result<bool> {
        while !self.write_queue.is_empty() {
            let chunk = self.write_queue.make_contiguous().to_vec();
            match self.stream.write(&chunk) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write to client socket")),
                Ok(n) => {
                    self.write_queue.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn interest(&self) -> Interest {
        if self.write_queue.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }
}

/// Shared state reachable from both the reactor thread and the executor
/// pool. Requests are looked up by id so a later `Track`/`Stop` management
/// message (spec.md §6) can reach the request it targets without the
/// reactor thread knowing anything about queueing.
#[derive(Default)]
struct Shared {
    requests_by_id: Mutex<HashMap<String, Arc<WorkerRequest>>>,
    inflight: Mutex<HashMap<String, JobMeta>>,
}

/// Handle to a running worker request/response service. Dropping it joins
/// the reactor thread and every executor thread.
pub struct WorkerServer {
    waker: Arc<Waker>,
    shutdown: Sender<()>,
    reactor: Option<JoinHandle<()>>,
    executors: Vec<JoinHandle<()>>,
}

impl WorkerServer {
    /// Binds `config.bind_addr` and starts the reactor plus `pool_size`
    /// executor threads pulling from a shared priority queue (spec.md
    /// §4.3's `(priority, arrival)` ordering).
    pub fn start(config: Arc<WorkerConfig>, pool_size: usize) -> io::Result<Self> {
        let mut listener = TcpListener::bind(config.bind_addr)?;
        let mut poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let shared = Arc::new(Shared::default());
        let queue = Arc::new(RequestQueue::new());
        let (outbound_tx, outbound_rx) = channel::<(Token, Vec<u8>)>();
        let (shutdown_tx, shutdown_rx) = channel::<()>();

        let mut executors = Vec::with_capacity(pool_size);
        for idx in 0..pool_size {
            let queue = queue.clone();
            let shared = shared.clone();
            let config = config.clone();
            let outbound_tx = outbound_tx.clone();
            let waker = waker.clone();
            executors.push(
                std::thread::Builder::new()
                    .name(format!("rplc-worker-exec-{idx}"))
                    .spawn(move || run_executor(queue, shared, config, outbound_tx, waker))
                    .expect("failed to spawn worker executor thread"),
            );
        }

        let reactor = std::thread::Builder::new()
            .name("rplc-worker-reactor".to_string())
            .spawn(move || run_reactor(poll, listener, queue, shared, outbound_rx, shutdown_rx))
            .expect("failed to spawn worker reactor thread");

        Ok(Self { waker, shutdown: shutdown_tx, reactor: Some(reactor), executors })
    }
}

impl Drop for WorkerServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        let _ = self.waker.wake();
        if let Some(handle) = self.reactor.take() {
            let _ = handle.join();
        }
        for handle in self.executors.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run_executor(queue: Arc<RequestQueue>, shared: Arc<Shared>, config: Arc<WorkerConfig>, outbound_tx: Sender<(Token, Vec<u8>)>, waker: Arc<Waker>) {
    loop {
        let Some(request) = queue.pop() else {
            std::thread::sleep(IDLE_POP_BACKOFF);
            continue;
        };
        let meta = shared.inflight.lock().remove(&request.id);
        let Some(meta) = meta else {
            tracing::warn!(id = %request.id, "popped request with no inflight metadata");
            continue;
        };

        request.mark_started(Timestamp::now());
        execute_one(&request, &meta.body, &config);

        let response = request.to_response();
        shared.requests_by_id.lock().remove(&request.id);
        match Frame::encode(&response) {
            Ok(bytes) => {
                if outbound_tx.send((meta.token, bytes)).is_ok() {
                    let _ = waker.wake();
                }
            }
            Err(e) => tracing::warn!(error = %e, id = %request.id, "failed to encode response"),
        }
    }
}

fn execute_one(request: &WorkerRequest, body: &RequestBody, config: &WorkerConfig) {
    let now = Timestamp::now();
    match body {
        RequestBody::Find { database, chunk, compute_cs } => match operations::find_replica(config, database, *chunk, *compute_cs) {
            Ok(replica) => request.finish_success(now, Some(replica), None, None),
            Err(e) => request.finish_failed(now, e.to_string()),
        },
        RequestBody::FindAll { database } => match operations::find_all_replicas(config, database) {
            Ok(replicas) => request.finish_success(now, None, Some(replicas), None),
            Err(e) => request.finish_failed(now, e.to_string()),
        },
        RequestBody::Delete { database, chunk, .. } => match operations::delete_replica(config, database, *chunk) {
            Ok(replica) if replica.status == rplc_types::ReplicaStatus::Corrupt => {
                request.finish_bad(now, "delete left orphaned files behind, catalog must resync");
            }
            Ok(replica) => request.finish_success(now, Some(replica), None, None),
            Err(e) => request.finish_failed(now, e.to_string()),
        },
        RequestBody::Replicate { database, chunk, worker_source, .. } => {
            let Some(peer_addr) = config.peer_addr(worker_source) else {
                request.finish_failed(now, format!("no known address for peer worker {worker_source}"));
                return;
            };
            let mut source = TcpPeerFileSource { peer_worker: worker_source.clone(), peer_addr };
            match operations::replicate_replica(config, &mut source, database, *chunk, request.cancel_flag()) {
                Ok(replica) => request.finish_success(now, Some(replica), None, None),
                Err(crate::error::WorkerError::Cancelled) => request.finish_cancelled(now),
                Err(e) => request.finish_failed(now, e.to_string()),
            }
        }
        RequestBody::Echo { data, delay_ms } => match operations::echo(data, *delay_ms, request.cancel_flag()) {
            Ok(echoed) => request.finish_success(now, None, None, Some(echoed)),
            Err(crate::error::WorkerError::Cancelled) => request.finish_cancelled(now),
            Err(e) => request.finish_failed(now, e.to_string()),
        },
        RequestBody::Track { .. } | RequestBody::Stop { .. } => {
            // Management bodies never reach the executor pool: the reactor
            // answers them inline against `requests_by_id`.
        }
    }
    if request.is_cancelled() && request.primary_state() != crate::state::PrimaryState::Finished {
        request.finish_cancelled(now);
    }
}

/// Builds the reply to a `Track`/`Stop` management message by projecting
/// the target request's current response onto a fresh envelope carrying
/// the management message's own id (spec.md §6: `target_performance` is
/// populated instead of `performance` for tracking replies).
fn build_management_reply(message_id: &str, target: Option<&Arc<WorkerRequest>>) -> rplc_wire::Response {
    match target {
        Some(target) => {
            let target_response = target.to_response();
            rplc_wire::Response {
                id: message_id.to_string(),
                status: target_response.status,
                status_ext: target_response.status_ext,
                performance: ServerPerformance::default(),
                target_performance: Some(target_response.performance),
                replica: target_response.replica,
                replicas: target_response.replicas,
                echo_data: target_response.echo_data,
            }
        }
        None => rplc_wire::Response {
            id: message_id.to_string(),
            status: ResponseStatus::Bad,
            status_ext: ResponseStatusExt::InvalidParam,
            performance: ServerPerformance::default(),
            target_performance: None,
            replica: None,
            replicas: None,
            echo_data: None,
        },
    }
}

fn queued_priority(header: &rplc_wire::RequestHeader) -> i32 {
    header.priority
}

/// Handles one decoded message. `Queued` requests are hashed off to the
/// executor pool and produce no immediate reply; `Track`/`Stop` management
/// messages are answered synchronously, on the reactor thread, against
/// whatever state the target request currently holds.
fn handle_message(message: RequestMessage, token: Token, shared: &Shared, queue: &RequestQueue) -> Option<Vec<u8>> {
    let RequestMessage { header, body } = message;
    match header.kind {
        RequestKind::Queued => {
            let queued_type = header.queued_type.unwrap_or(QueuedType::TestEcho);
            let request = Arc::new(WorkerRequest::new(header.id.clone(), queued_type, header.instance_id.clone()));
            request.mark_received(Timestamp::now());
            shared.requests_by_id.lock().insert(header.id.clone(), request.clone());
            shared.inflight.lock().insert(header.id.clone(), JobMeta { body, token, timeout: header.timeout });
            queue.push(request, queued_priority(&header));
            None
        }
        RequestKind::Request => {
            let (target_id, cancel) = match &body {
                RequestBody::Track { target_id, .. } => (target_id.clone(), false),
                RequestBody::Stop { target_id, .. } => (target_id.clone(), true),
                _ => {
                    tracing::warn!(id = %header.id, "management message carried a non-management body");
                    return None;
                }
            };
            let target = shared.requests_by_id.lock().get(&target_id).cloned();
            if cancel {
                if let Some(target) = &target {
                    target.request_cancel();
                }
            }
            let reply = build_management_reply(&header.id, target.as_ref());
            Frame::encode(&reply).ok()
        }
    }
}

fn run_reactor(
    mut poll: Poll,
    mut listener: TcpListener,
    queue: Arc<RequestQueue>,
    shared: Arc<Shared>,
    outbound_rx: Receiver<(Token, Vec<u8>)>,
    shutdown_rx: Receiver<()>,
) {
    let mut events = Events::with_capacity(256);
    let mut connections: HashMap<Token, ServerConnection> = HashMap::new();
    let mut next_token = 0usize;

    'outer: loop {
        if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!(error = %e, "worker reactor poll failed");
            break;
        }

        for event in events.iter() {
            match event.token() {
                WAKER_TOKEN => {}
                LISTENER_TOKEN => loop {
                    match listener.accept() {
                        Ok((mut stream, _addr)) => {
                            let token = Token(next_token);
                            next_token += 1;
                            if poll.registry().register(&mut stream, token, Interest::READABLE).is_ok() {
                                connections.insert(token, ServerConnection::new(stream));
                            }
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            break;
                        }
                    }
                },
                token => {
                    let mut drop_connection = false;
                    if let Some(conn) = connections.get_mut(&token) {
                        if conn.drain_writes().is_err() {
                            drop_connection = true;
                        } else {
                            match conn.fill_read_buf() {
                                Ok(true) => {}
                                Ok(false) | Err(_) => drop_connection = true,
                            }
                        }
                        if !drop_connection {
                            loop {
                                match Frame::try_decode::<RequestMessage>(&conn.read_buf) {
                                    Ok(Some((message, consumed))) => {
                                        let _ = conn.read_buf.split_to(consumed);
                                        if let Some(reply_bytes) = handle_message(message, token, &shared, &queue) {
                                            conn.write_queue.extend(reply_bytes);
                                        }
                                    }
                                    Ok(None) => break,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "failed to decode request frame");
                                        drop_connection = true;
                                        break;
                                    }
                                }
                            }
                        }
                        if !drop_connection {
                            let _ = poll.registry().reregister(&mut conn.stream, token, conn.interest());
                        }
                    }
                    if drop_connection {
                        if let Some(mut conn) = connections.remove(&token) {
                            let _ = poll.registry().deregister(&mut conn.stream);
                        }
                    }
                }
            }
        }

        while let Ok((token, bytes)) = outbound_rx.try_recv() {
            if let Some(conn) = connections.get_mut(&token) {
                conn.write_queue.extend(bytes);
                let _ = poll.registry().reregister(&mut conn.stream, token, conn.interest());
            }
        }

        if shutdown_rx.try_recv().is_ok() {
            break 'outer;
        }
    }
}
