use thiserror::Error;

/// Top-level error composing every sub-crate's own error type, the same
/// way the original composes `ServerError` from `WireError`/
/// `KimberliteError`/`io::Error` via `#[from]` (SPEC_FULL.md §7).
#[derive(Debug, Error)]
pub enum ReplicatorError {
    #[error(transparent)]
    Messenger(#[from] rplc_messenger::MessengerError),
    #[error(transparent)]
    Request(#[from] rplc_request::RequestError),
    #[error(transparent)]
    Job(#[from] rplc_job::JobError),
    #[error(transparent)]
    Services(#[from] rplc_services::ServicesError),
    #[error(transparent)]
    Ingest(#[from] rplc_ingest::IngestError),
    #[error(transparent)]
    Config(#[from] rplc_config::ConfigError),
    #[error("no address configured for worker {0:?}")]
    UnknownWorkerAddress(String),
    #[error("invalid worker address {address:?} for worker {worker:?}: {source}")]
    InvalidWorkerAddress {
        worker: String,
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("unknown database family: {0:?}")]
    UnknownFamily(String),
}
