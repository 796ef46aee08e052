use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("unknown worker: {0}")]
    UnknownWorker(String),
    #[error("unknown database: {0}")]
    UnknownDatabase(String),
    #[error("unknown database family: {0}")]
    UnknownFamily(String),
    #[error("unknown transaction: {0}")]
    UnknownTransaction(u64),
    #[error("unknown contribution: {0}")]
    UnknownContribution(u64),
    #[error("illegal transaction state transition: {from:?} -> {to:?}")]
    IllegalTransactionTransition {
        from: crate::transaction::TransactionState,
        to: crate::transaction::TransactionState,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
