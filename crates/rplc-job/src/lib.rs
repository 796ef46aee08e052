//! Controller-side Job framework for the replica-management control plane.
//!
//! A Job is the unit of work the Controller schedules: it owns zero or more
//! [`rplc_request::Request`]s and, for the compound jobs, zero or more child
//! Jobs, executing them synchronously on the calling thread (spec.md §5) via
//! [`JobContext::execute_request`] and `std::thread::scope` for any
//! internal fan-out. Every job type shares [`JobBase`]'s
//! `CREATED -> IN_PROGRESS -> FINISHED` state machine and one-shot
//! `on_finish` callback.

mod base;
mod context;
mod create_delete;
mod error;
mod find_all;
mod fix_up;
mod move_replica;
mod planner;
mod purge;
mod rebalance;
mod replicate;
mod state;

pub use base::JobBase;
pub use context::JobContext;
pub use create_delete::{CreateReplicaJob, DeleteReplicaJob, NullChunkNotifier, QservChunkNotifier};
pub use error::JobError;
pub use find_all::{FindAllJob, ReplicaData};
pub use fix_up::FixUpJob;
pub use move_replica::MoveReplicaJob;
pub use purge::PurgeJob;
pub use rebalance::{RebalanceJob, RebalancePlanEntry};
pub use replicate::ReplicateJob;
pub use state::{ExtendedState, PrimaryState};
