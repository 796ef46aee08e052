//! One ingest connection's handshake → data-loop → finish protocol
//! (spec.md §4.7). Unlike the worker's `mio` reactor
//! ([`rplc_worker::server`]), this connection suspends on blocking socket
//! reads between frames (spec.md §5's "suspension points"), so it runs on
//! its own OS thread rather than being multiplexed.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use rplc_services::{ContributionFailure, DatabaseServices, TransactionState};
use rplc_types::{ContributionId, TransactionId};
use rplc_wire::ingest::{IngestData, IngestHandshakeRequest, IngestResponse};
use rplc_wire::Frame;

use crate::error::IngestError;
use crate::loader::{LoadSpec, TableLoader};

const SUPPORTED_URL_SCHEMES: &[&str] = &["file"];

pub struct IngestConnectionConfig {
    pub auth_key: String,
    pub scratch_dir: PathBuf,
    pub worker: String,
}

/// Runs one connection to completion. `stream` must support blocking
/// `Read`/`Write`; a plain `TcpStream` is what [`crate::server::IngestServer`]
/// passes in.
pub fn handle_connection(
    stream: &mut (impl Read + Write),
    services: &Arc<dyn DatabaseServices>,
    loader: &Arc<dyn TableLoader>,
    config: &IngestConnectionConfig,
) -> Result<(), IngestError> {
    let handshake: IngestHandshakeRequest = Frame::read(stream)?;

    if handshake.auth_key != config.auth_key {
        tracing::warn!(transaction_id = handshake.transaction_id, "ingest handshake rejected: bad auth key");
        Frame::write(stream, &IngestResponse::failed(0, "auth key mismatch", false))?;
        return Ok(());
    }

    let transaction_id = TransactionId::from(handshake.transaction_id);
    let Some(transaction) = services.get_transaction(transaction_id)? else {
        tracing::warn!(transaction_id = handshake.transaction_id, "ingest handshake rejected: unknown transaction");
        Frame::write(stream, &IngestResponse::failed(0, "unknown transaction", false))?;
        return Ok(());
    };

    let contribution = services.create_contribution(
        transaction_id,
        &config.worker,
        &transaction.database,
        &handshake.table,
        handshake.chunk,
        handshake.is_overlap,
        &handshake.url,
        &handshake.charset_name,
    )?;
    let id = contribution.id;

    if transaction.state != TransactionState::Started {
        let c = services.failed_contribution(
            id,
            ContributionFailure::Create,
            None,
            None,
            &format!("transaction is in state {:?}, not STARTED", transaction.state),
            true,
        )?;
        Frame::write(stream, &IngestResponse::failed(id.get(), c.error.unwrap_or_default(), true))?;
        return Ok(());
    }

    if !loader.table_exists(&transaction.database, &handshake.table) {
        let c = services.failed_contribution(
            id,
            ContributionFailure::Start,
            None,
            None,
            &format!("table {} does not exist in database {}", handshake.table, transaction.database),
            true,
        )?;
        Frame::write(stream, &IngestResponse::failed(id.get(), c.error.unwrap_or_default(), true))?;
        return Ok(());
    }

    let Some(scheme) = handshake.url.split("://").next().filter(|_| handshake.url.contains("://")) else {
        let c = services.failed_contribution(id, ContributionFailure::Start, None, None, "malformed url", true)?;
        Frame::write(stream, &IngestResponse::failed(id.get(), c.error.unwrap_or_default(), true))?;
        return Ok(());
    };
    if !SUPPORTED_URL_SCHEMES.contains(&scheme) {
        let c = services.failed_contribution(
            id,
            ContributionFailure::Start,
            None,
            None,
            &format!("unsupported url scheme: {scheme}"),
            true,
        )?;
        Frame::write(stream, &IngestResponse::failed(id.get(), c.error.unwrap_or_default(), true))?;
        return Ok(());
    }

    std::fs::create_dir_all(&config.scratch_dir)?;
    let tmp_path = config.scratch_dir.join(format!("contrib-{}.tmp", id.get()));
    services.started_contribution(id, &tmp_path.to_string_lossy())?;
    Frame::write(stream, &IngestResponse::ready(id.get()))?;

    run_data_loop(stream, services, loader, id, transaction_id, &handshake, tmp_path)
}

/// Receives framed [`IngestData`] packets, parsing the whole accumulated
/// buffer as CSV only once `last=true` arrives (a documented
/// simplification: a row can never straddle a packet boundary in this
/// implementation, unlike the original's incremental `ColumnParser`).
fn run_data_loop(
    stream: &mut (impl Read + Write),
    services: &Arc<dyn DatabaseServices>,
    loader: &Arc<dyn TableLoader>,
    id: ContributionId,
    transaction_id: TransactionId,
    handshake: &IngestHandshakeRequest,
    tmp_path: PathBuf,
) -> Result<(), IngestError> {
    let mut buffer = Vec::new();
    loop {
        let packet: IngestData = Frame::read(stream)?;
        let num_bytes = packet.data.len() as u64;
        buffer.extend_from_slice(&packet.data);

        if !packet.last {
            services.read_contribution(id, num_bytes, 0)?;
            Frame::write(stream, &IngestResponse::ready(id.get()))?;
            continue;
        }

        let row_count = match write_parsed_rows(&buffer, handshake, transaction_id, &tmp_path) {
            Ok(count) => count,
            Err(e) => {
                let c = services.failed_contribution(id, ContributionFailure::Read, None, None, &e.to_string(), true)?;
                Frame::write(stream, &IngestResponse::failed(id.get(), c.error.unwrap_or_default(), true))?;
                return Ok(());
            }
        };
        services.read_contribution(id, num_bytes, row_count)?;

        let spec = LoadSpec {
            database: handshake_database(services, transaction_id)?,
            table: handshake.table.clone(),
            chunk: handshake.chunk,
            is_overlap: handshake.is_overlap,
            transaction_id,
            tmp_file: tmp_path.clone(),
            row_count,
        };
        return match loader.load(&spec) {
            Ok(outcome) => {
                services.loaded_contribution(id, outcome.num_rows_loaded, outcome.num_warnings)?;
                let response = IngestResponse {
                    id: id.get(),
                    status: rplc_wire::ingest::IngestStatus::Finished,
                    num_warnings: outcome.num_warnings,
                    num_rows: row_count,
                    num_rows_loaded: outcome.num_rows_loaded,
                    retry_allowed: false,
                    error: None,
                };
                Frame::write(stream, &response)?;
                Ok(())
            }
            Err(e) => {
                let c = services.failed_contribution(id, ContributionFailure::Load, None, None, &e.to_string(), false)?;
                Frame::write(stream, &IngestResponse::failed(id.get(), c.error.unwrap_or_default(), false))?;
                Ok(())
            }
        };
    }
}

fn handshake_database(services: &Arc<dyn DatabaseServices>, transaction_id: TransactionId) -> Result<String, IngestError> {
    Ok(services.get_transaction(transaction_id)?.map(|t| t.database).unwrap_or_default())
}

/// Parses `buffer` as CSV per the transaction's dialect, prepends the
/// transaction id as the first column of every row, and writes the
/// result to `tmp_path`. Returns the number of parsed rows.
fn write_parsed_rows(
    buffer: &[u8],
    handshake: &IngestHandshakeRequest,
    transaction_id: TransactionId,
    tmp_path: &std::path::Path,
) -> Result<u64, IngestError> {
    let dialect = &handshake.dialect_input;
    let mut reader_builder = csv::ReaderBuilder::new();
    reader_builder.delimiter(dialect.delimiter).quote(dialect.quote).has_headers(false).flexible(true);
    if let Some(escape) = dialect.escape {
        reader_builder.escape(Some(escape));
    }
    let mut reader = reader_builder.from_reader(buffer);

    let out_file = std::fs::OpenOptions::new().create(true).append(true).open(tmp_path)?;
    let mut writer = csv::WriterBuilder::new().delimiter(dialect.delimiter).quote(dialect.quote).has_headers(false).from_writer(out_file);

    let mut num_rows = 0u64;
    for record in reader.records() {
        let record = record?;
        let mut out = csv::StringRecord::new();
        out.push_field(&transaction_id.to_string());
        for field in record.iter() {
            out.push_field(field);
        }
        writer.write_record(&out)?;
        num_rows += 1;
    }
    writer.flush()?;
    Ok(num_rows)
}
