//! # rplc: top-level facade
//!
//! Re-exports every layer of the replica-management control plane and
//! wires them into one [`Controller`], the dependency root a CLI (or any
//! other embedder) constructs once from a loaded [`rplc_config::Settings`]
//! and then builds a [`rplc_job::JobContext`] from per job launched
//! (SPEC_FULL.md §0, §9).

mod controller;
mod error;

pub use controller::Controller;
pub use error::ReplicatorError;

pub use rplc_config as config;
pub use rplc_ingest as ingest;
pub use rplc_job as job;
pub use rplc_messenger as messenger;
pub use rplc_request as request;
pub use rplc_services as services;
pub use rplc_types as types;
pub use rplc_wire as wire;
