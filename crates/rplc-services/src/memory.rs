use std::collections::HashMap;

use parking_lot::Mutex;

use rplc_types::{ContributionId, ControllerId, JobId, Replica, RequestId, ServerPerformance, Timestamp, TransactionId};

use crate::catalog::{ControllerIdentity, DatabaseServices, JobRecord, ReplicationLevelHistogram, RequestRecord};
use crate::controller_event::ControllerEvent;
use crate::error::ServicesError;
use crate::named_mutex::{NamedMutexGuard, NamedMutexRegistry};
use crate::transaction::{Contribution, ContributionFailure, Transaction, TransactionState};

#[derive(Default)]
struct State {
    controller: Option<ControllerIdentity>,
    jobs: HashMap<JobId, JobRecord>,
    requests: HashMap<RequestId, RequestRecord>,
    events: Vec<ControllerEvent>,
    next_event_id: u64,
    replicas: HashMap<(String, String, u32), Replica>,
    worker_enabled: HashMap<String, bool>,
    transactions: HashMap<TransactionId, Transaction>,
    next_txn_id: u64,
    contributions: HashMap<ContributionId, Contribution>,
    next_contrib_id: u64,
    table_row_stats: HashMap<(String, String, u32), u64>,
}

/// An in-memory [`DatabaseServices`] implementation, used by tests and by
/// `database-test` dry runs. Mirrors the original's `InMemoryStorage`
/// dev/test pattern.
pub struct MemoryDatabaseServices {
    state: Mutex<State>,
    named_mutexes: NamedMutexRegistry,
}

impl Default for MemoryDatabaseServices {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabaseServices {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            named_mutexes: NamedMutexRegistry::new(),
        }
    }

    fn is_enabled(state: &State, worker: &str) -> bool {
        *state.worker_enabled.get(worker).unwrap_or(&true)
    }
}

impl DatabaseServices for MemoryDatabaseServices {
    fn save_controller(&self, identity: &ControllerIdentity) -> Result<(), ServicesError> {
        self.state.lock().controller = Some(identity.clone());
        Ok(())
    }

    fn save_job(&self, job: &JobRecord) -> Result<(), ServicesError> {
        self.state.lock().jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn update_heartbeat_time(&self, job_id: JobId, now: Timestamp) -> Result<(), ServicesError> {
        if let Some(job) = self.state.lock().jobs.get_mut(&job_id) {
            job.heartbeat_time = now;
        }
        Ok(())
    }

    fn save_request(&self, request: &RequestRecord) -> Result<(), ServicesError> {
        self.state.lock().requests.insert(request.id, request.clone());
        Ok(())
    }

    fn update_request_state(
        &self,
        request_id: RequestId,
        target_id: Option<RequestId>,
        target_performance: Option<ServerPerformance>,
    ) -> Result<(), ServicesError> {
        let mut state = self.state.lock();
        if let Some(req) = state.requests.get_mut(&request_id) {
            if let Some(perf) = target_performance {
                req.worker_receive_time = perf.receive_time;
                req.worker_start_time = perf.start_time;
                req.worker_finish_time = perf.finish_time;
            }
            if let Some(target) = target_id {
                req.kv.push(("target_id".to_string(), target.to_string()));
            }
        }
        Ok(())
    }

    fn log_controller_event(&self, event: &ControllerEvent) -> Result<(), ServicesError> {
        let mut state = self.state.lock();
        let mut event = event.clone();
        state.next_event_id += 1;
        event.id = state.next_event_id;
        state.events.push(event);
        Ok(())
    }

    fn read_controller_events(
        &self,
        controller_id: ControllerId,
        limit: usize,
    ) -> Result<Vec<ControllerEvent>, ServicesError> {
        let state = self.state.lock();
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.controller_id == controller_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn save_replica_info(&self, replica: &Replica) -> Result<(), ServicesError> {
        let mut state = self.state.lock();
        state
            .replicas
            .insert((replica.worker.clone(), replica.database.clone(), replica.chunk), replica.clone());
        Ok(())
    }

    fn save_replica_info_collection(
        &self,
        worker: &str,
        database: &str,
        collection: Vec<Replica>,
    ) -> Result<(), ServicesError> {
        let mut state = self.state.lock();
        let keep: std::collections::HashSet<u32> = collection.iter().map(|r| r.chunk).collect();
        state
            .replicas
            .retain(|(w, d, c), _| !(w == worker && d == database) || keep.contains(c));
        for replica in collection {
            state
                .replicas
                .insert((replica.worker.clone(), replica.database.clone(), replica.chunk), replica);
        }
        Ok(())
    }

    fn find_oldest_replicas(
        &self,
        database: &str,
        num_replicas: usize,
        enabled_workers_only: bool,
    ) -> Result<Vec<Replica>, ServicesError> {
        let state = self.state.lock();
        let mut replicas: Vec<Replica> = state
            .replicas
            .values()
            .filter(|r| r.database == database)
            .filter(|r| !enabled_workers_only || Self::is_enabled(&state, &r.worker))
            .cloned()
            .collect();
        replicas.sort_by_key(|r| r.verify_time);
        replicas.truncate(num_replicas);
        Ok(replicas)
    }

    fn find_replicas(&self, database: &str, chunk: u32, enabled_only: bool) -> Result<Vec<Replica>, ServicesError> {
        let state = self.state.lock();
        Ok(state
            .replicas
            .values()
            .filter(|r| r.database == database && r.chunk == chunk)
            .filter(|r| !enabled_only || Self::is_enabled(&state, &r.worker))
            .cloned()
            .collect())
    }

    fn find_replicas_for_chunks(
        &self,
        database: &str,
        chunks: &[u32],
        enabled_only: bool,
    ) -> Result<Vec<Replica>, ServicesError> {
        let state = self.state.lock();
        let chunk_set: std::collections::HashSet<u32> = chunks.iter().copied().collect();
        Ok(state
            .replicas
            .values()
            .filter(|r| r.database == database && chunk_set.contains(&r.chunk))
            .filter(|r| !enabled_only || Self::is_enabled(&state, &r.worker))
            .cloned()
            .collect())
    }

    fn find_worker_replicas(&self, worker: &str, database: Option<&str>) -> Result<Vec<Replica>, ServicesError> {
        let state = self.state.lock();
        Ok(state
            .replicas
            .values()
            .filter(|r| r.worker == worker)
            .filter(|r| database.is_none_or(|d| r.database == d))
            .cloned()
            .collect())
    }

    fn num_worker_replicas(&self, worker: &str, database: Option<&str>) -> Result<u64, ServicesError> {
        Ok(self.find_worker_replicas(worker, database)?.len() as u64)
    }

    fn find_database_chunks(&self, database: &str) -> Result<Vec<u32>, ServicesError> {
        let state = self.state.lock();
        let mut chunks: Vec<u32> = state
            .replicas
            .values()
            .filter(|r| r.database == database)
            .map(|r| r.chunk)
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        chunks.sort_unstable();
        Ok(chunks)
    }

    fn find_database_replicas(&self, database: &str) -> Result<Vec<Replica>, ServicesError> {
        let state = self.state.lock();
        Ok(state.replicas.values().filter(|r| r.database == database).cloned().collect())
    }

    fn actual_replication_level(
        &self,
        database: &str,
        exclude_workers: &[String],
    ) -> Result<ReplicationLevelHistogram, ServicesError> {
        let state = self.state.lock();
        let mut per_chunk: HashMap<u32, u64> = HashMap::new();
        for replica in state.replicas.values() {
            if replica.database != database || !replica.is_complete() {
                continue;
            }
            if exclude_workers.iter().any(|w| w == &replica.worker) {
                continue;
            }
            *per_chunk.entry(replica.chunk).or_insert(0) += 1;
        }
        let mut histogram = ReplicationLevelHistogram::new();
        for level in per_chunk.values() {
            *histogram.entry(*level as u32).or_insert(0) += 1;
        }
        Ok(histogram)
    }

    fn num_orphan_chunks(&self, database: &str, unique_on_workers: bool) -> Result<u64, ServicesError> {
        let state = self.state.lock();
        let mut per_chunk: HashMap<u32, u64> = HashMap::new();
        for replica in state.replicas.values() {
            if replica.database == database && replica.is_complete() {
                *per_chunk.entry(replica.chunk).or_insert(0) += 1;
            }
        }
        let threshold = if unique_on_workers { 1 } else { 0 };
        Ok(per_chunk.values().filter(|&&count| count <= threshold).count() as u64)
    }

    fn enabled_workers(&self) -> Result<Vec<String>, ServicesError> {
        let state = self.state.lock();
        let mut seen: std::collections::HashSet<String> = state
            .replicas
            .keys()
            .map(|(w, _, _)| w.clone())
            .collect();
        seen.extend(state.worker_enabled.keys().cloned());
        Ok(seen.into_iter().filter(|w| Self::is_enabled(&state, w)).collect())
    }

    fn set_worker_enabled(&self, worker: &str, enabled: bool) -> Result<(), ServicesError> {
        self.state.lock().worker_enabled.insert(worker.to_string(), enabled);
        Ok(())
    }

    fn create_transaction(&self, database: &str) -> Result<(Transaction, NamedMutexGuard), ServicesError> {
        let mut state = self.state.lock();
        state.next_txn_id += 1;
        let id = TransactionId::new(state.next_txn_id);
        let guard = self.named_mutexes.lock(&format!("transaction:{id}"));
        let txn = Transaction::new(id, database, Timestamp::now());
        state.transactions.insert(id, txn.clone());
        Ok((txn, guard))
    }

    fn update_transaction(&self, id: TransactionId, to: TransactionState) -> Result<Transaction, ServicesError> {
        let _guard = self.named_mutexes.lock(&format!("transaction:{id}"));
        let mut state = self.state.lock();
        let txn = state.transactions.get_mut(&id).ok_or(ServicesError::UnknownTransaction(id.get()))?;
        txn.transition(to, Timestamp::now())?;
        Ok(txn.clone())
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, ServicesError> {
        Ok(self.state.lock().transactions.get(&id).cloned())
    }

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
    ) -> Result<Contribution, ServicesError> {
        let mut state = self.state.lock();
        state.next_contrib_id += 1;
        let id = ContributionId::new(state.next_contrib_id);
        let contribution = Contribution::created(
            id,
            transaction_id,
            worker,
            database,
            table,
            chunk,
            is_overlap,
            url,
            charset,
            Timestamp::now(),
        );
        state.contributions.insert(id, contribution.clone());
        Ok(contribution)
    }

    fn started_contribution(&self, id: ContributionId, tmp_file: &str) -> Result<Contribution, ServicesError> {
        let mut state = self.state.lock();
        let c = state
            .contributions
            .get_mut(&id)
            .ok_or_else(|| ServicesError::UnknownContribution(id.get()))?;
        c.started(tmp_file, Timestamp::now());
        Ok(c.clone())
    }

    fn read_contribution(&self, id: ContributionId, num_bytes: u64, num_rows: u64) -> Result<Contribution, ServicesError> {
        let mut state = self.state.lock();
        let c = state
            .contributions
            .get_mut(&id)
            .ok_or_else(|| ServicesError::UnknownContribution(id.get()))?;
        c.read(num_bytes, num_rows, Timestamp::now());
        Ok(c.clone())
    }

    fn loaded_contribution(&self, id: ContributionId, num_rows_loaded: u64, num_warnings: u32) -> Result<Contribution, ServicesError> {
        let mut state = self.state.lock();
        let c = state
            .contributions
            .get_mut(&id)
            .ok_or_else(|| ServicesError::UnknownContribution(id.get()))?;
        c.loaded(num_rows_loaded, num_warnings, Timestamp::now());
        Ok(c.clone())
    }

    fn failed_contribution(
        &self,
        id: ContributionId,
        stage: ContributionFailure,
        http_error: Option<u32>,
        system_error: Option<i32>,
        error: &str,
        retry_allowed: bool,
    ) -> Result<Contribution, ServicesError> {
        let mut state = self.state.lock();
        let c = state
            .contributions
            .get_mut(&id)
            .ok_or_else(|| ServicesError::UnknownContribution(id.get()))?;
        c.failed(stage, http_error, system_error, error, retry_allowed, Timestamp::now());
        Ok(c.clone())
    }

    fn table_row_stats(&self, database: &str, table: &str) -> Result<Vec<(u32, u64)>, ServicesError> {
        let state = self.state.lock();
        Ok(state
            .table_row_stats
            .iter()
            .filter(|((d, t, _), _)| d == database && t == table)
            .map(|((_, _, chunk), rows)| (*chunk, *rows))
            .collect())
    }

    fn save_table_row_stats(&self, database: &str, table: &str, chunk: u32, rows: u64) -> Result<(), ServicesError> {
        self.state
            .lock()
            .table_row_stats
            .insert((database.to_string(), table.to_string(), chunk), rows);
        Ok(())
    }

    fn delete_table_row_stats(&self, database: &str, table: &str, chunk: Option<u32>) -> Result<(), ServicesError> {
        let mut state = self.state.lock();
        state
            .table_row_stats
            .retain(|(d, t, c), _| !(d == database && t == table && chunk.is_none_or(|wanted| *c == wanted)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rplc_types::ReplicaStatus;

    fn complete_replica(worker: &str, database: &str, chunk: u32) -> Replica {
        Replica {
            worker: worker.to_string(),
            database: database.to_string(),
            chunk,
            status: ReplicaStatus::Complete,
            verify_time: Timestamp::now(),
            files: Vec::new(),
        }
    }

    #[test]
    fn resync_is_idempotent() {
        let services = MemoryDatabaseServices::new();
        let collection = vec![complete_replica("w1", "db", 1), complete_replica("w1", "db", 2)];
        services.save_replica_info_collection("w1", "db", collection.clone()).unwrap();
        let first = services.find_worker_replicas("w1", Some("db")).unwrap();

        services.save_replica_info_collection("w1", "db", collection).unwrap();
        let second = services.find_worker_replicas("w1", Some("db")).unwrap();

        let mut first_chunks: Vec<u32> = first.iter().map(|r| r.chunk).collect();
        let mut second_chunks: Vec<u32> = second.iter().map(|r| r.chunk).collect();
        first_chunks.sort_unstable();
        second_chunks.sort_unstable();
        assert_eq!(first_chunks, second_chunks);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn resync_deletes_replicas_absent_from_new_collection() {
        let services = MemoryDatabaseServices::new();
        services
            .save_replica_info_collection("w1", "db", vec![complete_replica("w1", "db", 1), complete_replica("w1", "db", 2)])
            .unwrap();
        services.save_replica_info_collection("w1", "db", vec![complete_replica("w1", "db", 1)]).unwrap();
        let remaining = services.find_worker_replicas("w1", Some("db")).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].chunk, 1);
    }

    #[test]
    fn actual_replication_level_counts_complete_replicas_only() {
        let services = MemoryDatabaseServices::new();
        services.save_replica_info(&complete_replica("w1", "db", 1)).unwrap();
        services.save_replica_info(&complete_replica("w2", "db", 1)).unwrap();
        services.save_replica_info(&complete_replica("w1", "db", 2)).unwrap();

        let histogram = services.actual_replication_level("db", &[]).unwrap();
        assert_eq!(histogram.get(&2), Some(&1)); // chunk 1 at level 2
        assert_eq!(histogram.get(&1), Some(&1)); // chunk 2 at level 1
    }

    #[test]
    fn transaction_lifecycle_through_services() {
        let services = MemoryDatabaseServices::new();
        let (txn, guard) = services.create_transaction("db").unwrap();
        drop(guard);
        let txn = services.update_transaction(txn.id, TransactionState::Started).unwrap();
        assert_eq!(txn.state, TransactionState::Started);
        assert!(services.update_transaction(txn.id, TransactionState::IsStarting).is_err());
    }
}
