//! # rplc-ingest: Ingest server connection and CSV loading pipeline
//!
//! Implements spec.md §4.7: a framed handshake opens one contribution
//! under an existing super-transaction, the connection streams CSV data
//! packets, and `loadDataIntoTable` (the [`loader::TableLoader`] seam)
//! lands the parsed rows. The connection handler (`connection`) is
//! transport-agnostic over `Read + Write`; [`server::IngestServer`] wires
//! it to a blocking per-connection TCP accept loop, the faithful
//! counterpart to [`rplc_worker::server::WorkerServer`]'s `mio` reactor
//! given this protocol's strictly sequential, blocking nature (spec.md
//! §5).

mod connection;
mod error;
mod loader;
mod server;

pub use connection::{handle_connection, IngestConnectionConfig};
pub use error::IngestError;
pub use loader::{physical_table_name, LoadOutcome, LoadSpec, NullTableLoader, SqliteTableLoader, TableLoader};
pub use server::IngestServer;
