//! Framed ingest-connection protocol (spec.md §4.7, §6).

use serde::{Deserialize, Serialize};

/// Client → server handshake opening a contribution load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestHandshakeRequest {
    pub auth_key: String,
    pub transaction_id: u64,
    pub table: String,
    pub chunk: Option<u32>,
    pub is_overlap: bool,
    pub url: String,
    pub dialect_input: CsvDialect,
    pub charset_name: String,
    pub max_num_warnings: u32,
}

/// The transaction's CSV dialect, translated into a `csv::ReaderBuilder`
/// configuration by `rplc-ingest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvDialect {
    pub delimiter: u8,
    pub quote: u8,
    pub escape: Option<u8>,
    pub null_string: Option<String>,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: None,
            null_string: Some(r"\N".to_string()),
        }
    }
}

/// Client → server streamed data packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestData {
    pub data: Vec<u8>,
    pub last: bool,
}

/// Server → client reply, sent after the handshake and after every data
/// packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub id: u64,
    pub status: IngestStatus,
    pub num_warnings: u32,
    pub num_rows: u64,
    pub num_rows_loaded: u64,
    pub retry_allowed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStatus {
    ReadyToReadData,
    Finished,
    Failed,
}

impl IngestResponse {
    pub fn failed(id: u64, error: impl Into<String>, retry_allowed: bool) -> Self {
        Self {
            id,
            status: IngestStatus::Failed,
            num_warnings: 0,
            num_rows: 0,
            num_rows_loaded: 0,
            retry_allowed,
            error: Some(error.into()),
        }
    }

    pub fn ready(id: u64) -> Self {
        Self {
            id,
            status: IngestStatus::ReadyToReadData,
            num_warnings: 0,
            num_rows: 0,
            num_rows_loaded: 0,
            retry_allowed: true,
            error: None,
        }
    }
}
