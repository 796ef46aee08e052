use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("i/o error talking to worker {worker}: {source}")]
    Io {
        worker: String,
        #[source]
        source: std::io::Error,
    },
    #[error("wire error: {0}")]
    Wire(#[from] rplc_wire::FrameError),
    #[error("messenger event loop has shut down")]
    Closed,
    #[error("no such worker registered: {0}")]
    UnknownWorker(String),
    #[error("request {0} timed out")]
    Timeout(String),
    #[error("request {0} was cancelled")]
    Cancelled(String),
}
