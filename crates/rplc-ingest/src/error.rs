use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] rplc_wire::FrameError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Services(#[from] rplc_services::ServicesError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported url scheme: {0}")]
    UnsupportedUrlScheme(String),
}
