//! # rplc-types: Core data model for the replica-management control plane
//!
//! This crate contains the shared, side-effect-free types used across the
//! replicator: worker/database/chunk identities, the [`Replica`] and
//! [`FileInfo`] records a worker reports back, [`DatabaseFamily`]
//! collocation/replication policy, and the chunk-file naming convention
//! that derives a file's base table and flags from its on-disk name.
//!
//! Nothing in this crate touches the network, the clock, or the
//! filesystem — those live in `rplc-messenger`, `rplc-services` and
//! `rplc-worker` respectively.

mod family;
mod filename;
mod ids;
mod replica;
mod timestamp;

pub use family::DatabaseFamily;
pub use filename::{ChunkFileName, FilenameError};
pub use ids::{ContributionId, ControllerId, JobId, RequestId, TransactionId};
pub use replica::{FileInfo, Replica, ReplicaStatus};
pub use timestamp::{Clock, FakeClock, ServerPerformance, SystemClock, Timestamp};
