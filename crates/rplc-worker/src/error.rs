use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("i/o error on {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error(transparent)]
    Wire(#[from] rplc_wire::FrameError),
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch { file: String, expected: String, actual: String },
    #[error("unknown database: {0}")]
    UnknownDatabase(String),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("peer worker {worker} refused the file request: {reason}")]
    PeerRefused { worker: String, reason: String },
}
