//! The worker's file-copy service (spec.md Glossary: "Worker... exposing a
//! request/response service AND a file-copy service"). Kept as a separate,
//! blocking TCP listener from the non-blocking request/response server in
//! [`crate::server`] — file transfer is long-running I/O best served off
//! the event-loop thread, by the same worker-local thread pool that runs
//! `execute()` (spec.md §4.3).

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};

use serde::{Deserialize, Serialize};

use rplc_wire::Frame;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

#[derive(Debug, Serialize, Deserialize)]
struct FileFetchRequest {
    database: String,
    chunk: u32,
    file_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileFetchResponse {
    ok: bool,
    size: u64,
    error: Option<String>,
}

/// Client side of the file-copy protocol, used by [`crate::replicate`]
/// pulling files from a peer worker (spec.md §4.3's Replicate algorithm,
/// step 2).
pub trait PeerFileSource: Send {
    fn open(&mut self, database: &str, chunk: u32, file_name: &str) -> Result<Box<dyn Read>, WorkerError>;
}

/// A [`PeerFileSource`] that connects to a peer worker's file-copy
/// listener over plain TCP.
pub struct TcpPeerFileSource {
    pub peer_worker: String,
    pub peer_addr: SocketAddr,
}

impl PeerFileSource for TcpPeerFileSource {
    fn open(&mut self, database: &str, chunk: u32, file_name: &str) -> Result<Box<dyn Read>, WorkerError> {
        let mut stream = TcpStream::connect(self.peer_addr).map_err(|source| WorkerError::Io { path: self.peer_addr.to_string(), source })?;
        let request = FileFetchRequest { database: database.to_string(), chunk, file_name: file_name.to_string() };
        Frame::write(&mut stream, &request)?;
        let response: FileFetchResponse = Frame::read(&mut stream)?;
        if !response.ok {
            return Err(WorkerError::PeerRefused {
                worker: self.peer_worker.clone(),
                reason: response.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        Ok(Box::new(stream.take(response.size)))
    }
}

/// Runs the blocking file-copy listener on its own thread until the
/// process exits. Each connection is served inline — file transfer
/// sessions are short request/response pairs followed by one stream, not
/// long-lived multiplexed connections like the request/response service.
pub fn spawn_file_service(config: std::sync::Arc<WorkerConfig>) -> std::io::Result<std::thread::JoinHandle<()>> {
    let listener = TcpListener::bind(config.bind_addr)?;
    std::thread::Builder::new().name("rplc-worker-file-service".to_string()).spawn(move || {
        for incoming in listener.incoming() {
            let Ok(stream) = incoming else { continue };
            let config = config.clone();
            std::thread::spawn(move || {
                if let Err(e) = serve_one(stream, &config) {
                    tracing::warn!(error = %e, "file-copy request failed");
                }
            });
        }
    })
}

fn serve_one(mut stream: TcpStream, config: &WorkerConfig) -> Result<(), WorkerError> {
    let request: FileFetchRequest = Frame::read(&mut stream)?;
    let path = config.file_path(&request.database, &request.file_name);
    match std::fs::metadata(&path) {
        Ok(meta) => {
            let response = FileFetchResponse { ok: true, size: meta.len(), error: None };
            Frame::write(&mut stream, &response)?;
            let mut file = std::fs::File::open(&path).map_err(|source| WorkerError::Io { path: path.display().to_string(), source })?;
            std::io::copy(&mut file, &mut stream).map_err(|source| WorkerError::Io { path: path.display().to_string(), source })?;
            Ok(())
        }
        Err(_) => {
            let response = FileFetchResponse { ok: false, size: 0, error: Some(format!("no such file: {}", request.file_name)) };
            Frame::write(&mut stream, &response)?;
            Ok(())
        }
    }
}
