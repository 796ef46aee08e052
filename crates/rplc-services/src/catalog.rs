use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rplc_types::{ContributionId, ControllerId, JobId, Replica, RequestId, ServerPerformance, Timestamp, TransactionId};

use crate::controller_event::ControllerEvent;
use crate::error::ServicesError;
use crate::named_mutex::NamedMutexGuard;
use crate::transaction::{Contribution, ContributionFailure, Transaction, TransactionState};

/// `controller(id, hostname, pid, started)` — spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerIdentity {
    pub id: ControllerId,
    pub hostname: String,
    pub pid: u32,
    pub started: Timestamp,
}

/// `job(id, controllerId, parentJobId, type, state, extendedState, ...)`
/// — spec.md §6. `state`/`extended_state` are stored as their `Display`
/// strings so this crate doesn't need to depend on `rplc-job`'s enums.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub controller_id: ControllerId,
    pub parent_job_id: Option<JobId>,
    pub job_type: String,
    pub state: String,
    pub extended_state: String,
    pub begin_time: Timestamp,
    pub end_time: Timestamp,
    pub heartbeat_time: Timestamp,
    pub priority: i32,
    pub kv: Vec<(String, String)>,
}

/// `request(id, jobId, name, worker, priority, state, extendedState,
/// serverStatus, ...)` — spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub job_id: Option<JobId>,
    pub name: String,
    pub worker: String,
    pub priority: i32,
    pub state: String,
    pub extended_state: String,
    pub server_status: Option<String>,
    pub controller_create_time: Timestamp,
    pub controller_start_time: Timestamp,
    pub controller_finish_time: Timestamp,
    pub worker_receive_time: Timestamp,
    pub worker_start_time: Timestamp,
    pub worker_finish_time: Timestamp,
    pub kv: Vec<(String, String)>,
}

/// Histogram of `replicationLevel -> chunkCount` returned by
/// `actualReplicationLevel` (spec.md §4.6).
pub type ReplicationLevelHistogram = BTreeMap<u32, u64>;

/// The persistence seam named `DatabaseServices` in spec.md §4.6: the one
/// place Jobs, Requests, and the ingest connection read and write durable
/// state. All mutating catalog calls are atomic with respect to
/// concurrent readers (spec.md §4.6's closing paragraph).
pub trait DatabaseServices: Send + Sync {
    // ------------------------------------------------------------------
    // Identity / log
    // ------------------------------------------------------------------
    fn save_controller(&self, identity: &ControllerIdentity) -> Result<(), ServicesError>;
    fn save_job(&self, job: &JobRecord) -> Result<(), ServicesError>;
    fn update_heartbeat_time(&self, job_id: JobId, now: Timestamp) -> Result<(), ServicesError>;
    fn save_request(&self, request: &RequestRecord) -> Result<(), ServicesError>;
    /// Updates a request's `server_status` and worker-side performance,
    /// as observed via a `REQUEST_TRACK` reply referencing `target_id`.
    fn update_request_state(
        &self,
        request_id: RequestId,
        target_id: Option<RequestId>,
        target_performance: Option<ServerPerformance>,
    ) -> Result<(), ServicesError>;
    fn log_controller_event(&self, event: &ControllerEvent) -> Result<(), ServicesError>;
    fn read_controller_events(
        &self,
        controller_id: ControllerId,
        limit: usize,
    ) -> Result<Vec<ControllerEvent>, ServicesError>;

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------
    fn save_replica_info(&self, replica: &Replica) -> Result<(), ServicesError>;

    /// Resyncs the persisted replica set for `(worker, database)` against
    /// `collection`: replicas absent from `collection` are deleted,
    /// present-but-new are inserted, present-and-existing are updated
    /// (spec.md §4.6). Applying this twice in succession with the same
    /// `collection` must leave the persisted set identical to it
    /// bit-for-bit (spec.md §8's idempotent-resync property).
    fn save_replica_info_collection(
        &self,
        worker: &str,
        database: &str,
        collection: Vec<Replica>,
    ) -> Result<(), ServicesError>;

    fn find_oldest_replicas(
        &self,
        database: &str,
        num_replicas: usize,
        enabled_workers_only: bool,
    ) -> Result<Vec<Replica>, ServicesError>;

    fn find_replicas(&self, database: &str, chunk: u32, enabled_only: bool) -> Result<Vec<Replica>, ServicesError>;

    fn find_replicas_for_chunks(
        &self,
        database: &str,
        chunks: &[u32],
        enabled_only: bool,
    ) -> Result<Vec<Replica>, ServicesError>;

    fn find_worker_replicas(&self, worker: &str, database: Option<&str>) -> Result<Vec<Replica>, ServicesError>;

    fn num_worker_replicas(&self, worker: &str, database: Option<&str>) -> Result<u64, ServicesError>;

    fn find_database_chunks(&self, database: &str) -> Result<Vec<u32>, ServicesError>;

    fn find_database_replicas(&self, database: &str) -> Result<Vec<Replica>, ServicesError>;

    // ------------------------------------------------------------------
    // Analytics
    // ------------------------------------------------------------------
    fn actual_replication_level(
        &self,
        database: &str,
        exclude_workers: &[String],
    ) -> Result<ReplicationLevelHistogram, ServicesError>;

    fn num_orphan_chunks(&self, database: &str, unique_on_workers: bool) -> Result<u64, ServicesError>;

    // ------------------------------------------------------------------
    // Worker enablement (ambient: planners need to know the live fleet)
    // ------------------------------------------------------------------
    fn enabled_workers(&self) -> Result<Vec<String>, ServicesError>;
    fn set_worker_enabled(&self, worker: &str, enabled: bool) -> Result<(), ServicesError>;

    // ------------------------------------------------------------------
    // Transactions / contributions (spec.md §4.7)
    // ------------------------------------------------------------------

    /// Atomically creates the transaction row in `IsStarting` AND
    /// acquires the named mutex `"transaction:<id>"`. The lock is held by
    /// the caller until explicit release (it is returned as part of the
    /// guard).
    fn create_transaction(&self, database: &str) -> Result<(Transaction, NamedMutexGuard), ServicesError>;

    /// Applies a state transition, taking the transaction's named mutex
    /// for the duration of the call.
    fn update_transaction(&self, id: TransactionId, to: TransactionState) -> Result<Transaction, ServicesError>;

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, ServicesError>;

    #[allow(clippy::too_many_arguments)]
    fn create_contribution(
        &self,
        transaction_id: TransactionId,
        worker: &str,
        database: &str,
        table: &str,
        chunk: Option<u32>,
        is_overlap: bool,
        url: &str,
        charset: &str,
    ) -> Result<Contribution, ServicesError>;

    fn started_contribution(&self, id: ContributionId, tmp_file: &str) -> Result<Contribution, ServicesError>;
    fn read_contribution(&self, id: ContributionId, num_bytes: u64, num_rows: u64) -> Result<Contribution, ServicesError>;
    fn loaded_contribution(&self, id: ContributionId, num_rows_loaded: u64, num_warnings: u32) -> Result<Contribution, ServicesError>;
    #[allow(clippy::too_many_arguments)]
    fn failed_contribution(
        &self,
        id: ContributionId,
        stage: ContributionFailure,
        http_error: Option<u32>,
        system_error: Option<i32>,
        error: &str,
        retry_allowed: bool,
    ) -> Result<Contribution, ServicesError>;

    // ------------------------------------------------------------------
    // Table row stats
    // ------------------------------------------------------------------
    fn table_row_stats(&self, database: &str, table: &str) -> Result<Vec<(u32, u64)>, ServicesError>;
    fn save_table_row_stats(&self, database: &str, table: &str, chunk: u32, rows: u64) -> Result<(), ServicesError>;
    fn delete_table_row_stats(&self, database: &str, table: &str, chunk: Option<u32>) -> Result<(), ServicesError>;
}
