//! Blocking accept loop for the ingest connection (spec.md §5: "the
//! ingest connection suspends on socket reads between frames"). Unlike
//! [`rplc_worker::server::WorkerServer`]'s single-reactor/thread-pool
//! design, each ingest connection owns an OS thread for its lifetime —
//! there is no multiplexing to do, since a connection's own protocol is
//! strictly sequential.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rplc_services::DatabaseServices;

use crate::connection::{handle_connection, IngestConnectionConfig};
use crate::loader::TableLoader;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a running ingest server. Dropping it stops the accept loop
/// and joins every connection thread it spawned.
pub struct IngestServer {
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl IngestServer {
    pub fn start(
        bind_addr: std::net::SocketAddr,
        services: Arc<dyn DatabaseServices>,
        loader: Arc<dyn TableLoader>,
        config: Arc<IngestConnectionConfig>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_shutdown = shutdown.clone();
        let accept_thread = std::thread::Builder::new()
            .name("rplc-ingest-accept".to_string())
            .spawn(move || run_accept_loop(listener, accept_shutdown, services, loader, config))
            .expect("failed to spawn ingest accept thread");

        Ok(Self { shutdown, accept_thread: Some(accept_thread) })
    }
}

impl Drop for IngestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn run_accept_loop(
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    services: Arc<dyn DatabaseServices>,
    loader: Arc<dyn TableLoader>,
    config: Arc<IngestConnectionConfig>,
) {
    let mut connection_threads = Vec::new();
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                tracing::debug!(%addr, "accepted ingest connection");
                let services = services.clone();
                let loader = loader.clone();
                let config = config.clone();
                let handle = std::thread::Builder::new()
                    .name("rplc-ingest-conn".to_string())
                    .spawn(move || run_connection(stream, services, loader, config))
                    .expect("failed to spawn ingest connection thread");
                connection_threads.push(handle);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "ingest accept failed");
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
        connection_threads.retain(|h| !h.is_finished());
    }
    for handle in connection_threads {
        let _ = handle.join();
    }
}

fn run_connection(
    mut stream: TcpStream,
    services: Arc<dyn DatabaseServices>,
    loader: Arc<dyn TableLoader>,
    config: Arc<IngestConnectionConfig>,
) {
    if let Err(e) = handle_connection(&mut stream, &services, &loader, &config) {
        tracing::warn!(error = %e, "ingest connection ended with an error");
    }
}
