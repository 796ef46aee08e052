//! # rplc-worker: Worker-side request execution (spec.md §4.3)
//!
//! A worker exposes two independent services against its local POSIX
//! replica store: a non-blocking request/response service ([`server`])
//! that accepts queued Replicate/Delete/Find/FindAll/Echo operations and
//! Track/Stop management messages, and a blocking file-copy service
//! ([`file_protocol`]) that other workers pull chunk files from during
//! Replicate.
//!
//! Queued operations are executed by a fixed-size thread pool pulling
//! from a `(priority, arrival)` ordered [`queue::RequestQueue`]; each
//! [`request::WorkerRequest`] tracks its own primary/extended state and
//! supports cooperative cancellation via an `AtomicBool` checked between
//! files and between buffer reads.

mod checksum;
mod config;
mod error;
mod file_protocol;
mod operations;
mod queue;
mod request;
mod server;
mod state;

pub use checksum::{checksum_file, ResumableChecksum};
pub use config::{ensure_dir, WorkerConfig};
pub use error::WorkerError;
pub use file_protocol::{spawn_file_service, PeerFileSource, TcpPeerFileSource};
pub use operations::{delete_replica, echo, find_all_replicas, find_replica, replicate_replica};
pub use queue::RequestQueue;
pub use request::WorkerRequest;
pub use server::WorkerServer;
pub use state::{ExtendedState, PrimaryState};
