//! # rplc-services: Persistent controller/job/request state
//!
//! This crate is the seam named `DatabaseServices` in spec.md §4.6: the
//! one place Jobs, Requests, and the ingest connection go to read and
//! write durable state. It also carries two process-local primitives that
//! guard concurrent mutation — the chunk-lock registry (§4.5) and the
//! named-mutex registry (§4.7) — since both live at the same layer of the
//! system as the catalog they protect.
//!
//! Two [`DatabaseServices`] implementations are provided, mirroring the
//! original's factory-selected backends (`DatabaseServicesMySQL` there,
//! `MemoryDatabaseServices`/`SqliteDatabaseServices` here): an in-memory
//! one for tests and `database-test` dry runs, and a `rusqlite`-backed one
//! for real deployments.

pub mod catalog;
mod chunk_lock;
mod controller_event;
mod error;
mod memory;
mod named_mutex;
mod sqlite;
mod transaction;

pub use catalog::{
    ControllerIdentity, DatabaseServices, JobRecord, ReplicationLevelHistogram, RequestRecord,
};
pub use chunk_lock::ChunkLockRegistry;
pub use controller_event::ControllerEvent;
pub use error::ServicesError;
pub use memory::MemoryDatabaseServices;
pub use named_mutex::{NamedMutexGuard, NamedMutexRegistry};
pub use sqlite::SqliteDatabaseServices;
pub use transaction::{
    Contribution, ContributionFailure, ContributionStatus, Transaction, TransactionState,
};
