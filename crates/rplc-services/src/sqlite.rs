use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use rplc_types::{
    ContributionId, ControllerId, FileInfo, JobId, Replica, ReplicaStatus, RequestId, ServerPerformance, Timestamp,
    TransactionId,
};

use crate::catalog::{ControllerIdentity, DatabaseServices, JobRecord, ReplicationLevelHistogram, RequestRecord};
use crate::controller_event::ControllerEvent;
use crate::error::ServicesError;
use crate::named_mutex::{NamedMutexGuard, NamedMutexRegistry};
use crate::transaction::{Contribution, ContributionFailure, ContributionStatus, Transaction, TransactionLogEntry, TransactionState};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS controller (
    id TEXT NOT NULL,
    hostname TEXT NOT NULL,
    pid INTEGER NOT NULL,
    started INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS job (
    id TEXT PRIMARY KEY,
    controller_id TEXT NOT NULL,
    parent_job_id TEXT,
    job_type TEXT NOT NULL,
    state TEXT NOT NULL,
    extended_state TEXT NOT NULL,
    begin_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    heartbeat_time INTEGER NOT NULL,
    priority INTEGER NOT NULL,
    kv TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS request (
    id TEXT PRIMARY KEY,
    job_id TEXT,
    name TEXT NOT NULL,
    worker TEXT NOT NULL,
    priority INTEGER NOT NULL,
    state TEXT NOT NULL,
    extended_state TEXT NOT NULL,
    server_status TEXT,
    controller_create_time INTEGER NOT NULL,
    controller_start_time INTEGER NOT NULL,
    controller_finish_time INTEGER NOT NULL,
    worker_receive_time INTEGER NOT NULL,
    worker_start_time INTEGER NOT NULL,
    worker_finish_time INTEGER NOT NULL,
    kv TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS controller_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    controller_id TEXT NOT NULL,
    ts INTEGER NOT NULL,
    task TEXT NOT NULL,
    operation TEXT NOT NULL,
    status TEXT NOT NULL,
    request_id TEXT,
    job_id TEXT,
    kv TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS replica (
    worker TEXT NOT NULL,
    database TEXT NOT NULL,
    chunk INTEGER NOT NULL,
    status TEXT NOT NULL,
    verify_time INTEGER NOT NULL,
    files TEXT NOT NULL,
    PRIMARY KEY (worker, database, chunk)
);

CREATE TABLE IF NOT EXISTS worker_enabled (
    worker TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS txn (
    id INTEGER PRIMARY KEY,
    database TEXT NOT NULL,
    state TEXT NOT NULL,
    begin_time INTEGER NOT NULL,
    start_time INTEGER NOT NULL,
    transition_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    context TEXT,
    log TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transaction_contrib (
    id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL,
    worker TEXT NOT NULL,
    database TEXT NOT NULL,
    table_name TEXT NOT NULL,
    chunk INTEGER,
    is_overlap INTEGER NOT NULL,
    url TEXT NOT NULL,
    is_async INTEGER NOT NULL,
    charset TEXT NOT NULL,
    status TEXT NOT NULL,
    create_time INTEGER NOT NULL,
    start_time INTEGER NOT NULL,
    read_time INTEGER NOT NULL,
    load_time INTEGER NOT NULL,
    num_bytes INTEGER NOT NULL,
    num_rows INTEGER NOT NULL,
    num_rows_loaded INTEGER NOT NULL,
    num_warnings INTEGER NOT NULL,
    http_error INTEGER,
    system_error INTEGER,
    error TEXT,
    retry_allowed INTEGER NOT NULL,
    tmp_file TEXT
);

CREATE TABLE IF NOT EXISTS table_row_stats (
    database TEXT NOT NULL,
    table_name TEXT NOT NULL,
    chunk INTEGER NOT NULL,
    rows INTEGER NOT NULL,
    PRIMARY KEY (database, table_name, chunk)
);
"#;

/// A [`DatabaseServices`] implementation backed by an embedded SQLite
/// database. spec.md §6 describes the catalog as a set of
/// storage-engine-independent logical tables; since the worker-side
/// storage engines this system orchestrates are themselves out of scope,
/// a small embedded SQL store is the concrete engine for that catalog
/// (`SPEC_FULL.md` §6), mirroring the original's `DatabaseServices`
/// concrete-backend-behind-a-factory design (`DatabaseServices.cc`).
pub struct SqliteDatabaseServices {
    conn: Mutex<Connection>,
    named_mutexes: NamedMutexRegistry,
}

impl SqliteDatabaseServices {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, ServicesError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            named_mutexes: NamedMutexRegistry::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self, ServicesError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            named_mutexes: NamedMutexRegistry::new(),
        })
    }

    fn status_str(status: ReplicaStatus) -> &'static str {
        status.as_str()
    }

    fn parse_status(s: &str) -> ReplicaStatus {
        match s {
            "CORRUPT" => ReplicaStatus::Corrupt,
            "INCOMPLETE" => ReplicaStatus::Incomplete,
            "COMPLETE" => ReplicaStatus::Complete,
            _ => ReplicaStatus::NotFound,
        }
    }

    fn row_to_replica(worker: String, database: String, chunk: u32, status: String, verify_time: i64, files: String) -> Result<Replica, ServicesError> {
        let files: Vec<FileInfo> = serde_json::from_str(&files)?;
        Ok(Replica {
            worker,
            database,
            chunk,
            status: Self::parse_status(&status),
            verify_time: Timestamp::from_millis(verify_time as u64),
            files,
        })
    }
}

impl DatabaseServices for SqliteDatabaseServices {
    fn save_controller(&self, identity: &ControllerIdentity) -> Result<(), ServicesError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM controller", [])?;
        conn.execute(
            "INSERT INTO controller (id, hostname, pid, started) VALUES (?1, ?2, ?3, ?4)",
            params![identity.id.to_string(), identity.hostname, identity.pid, identity.started.as_millis() as i64],
        )?;
        Ok(())
    }

    fn save_job(&self, job: &JobRecord) -> Result<(), ServicesError> {
        let kv = serde_json::to_string(&job.kv)?;
        self.conn.lock().execute(
            "INSERT INTO job (id, controller_id, parent_job_id, job_type, state, extended_state, begin_time, end_time, heartbeat_time, priority, kv)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, extended_state = excluded.extended_state,
                end_time = excluded.end_time, heartbeat_time = excluded.heartbeat_time, kv = excluded.kv",
            params![
                job.id.to_string(),
                job.controller_id.to_string(),
                job.parent_job_id.map(|id| id.to_string()),
                job.job_type,
                job.state,
                job.extended_state,
                job.begin_time.as_millis() as i64,
                job.end_time.as_millis() as i64,
                job.heartbeat_time.as_millis() as i64,
                job.priority,
                kv,
            ],
        )?;
        Ok(())
    }

    fn update_heartbeat_time(&self, job_id: JobId, now: Timestamp) -> Result<(), ServicesError> {
        self.conn.lock().execute(
            "UPDATE job SET heartbeat_time = ?1 WHERE id = ?2",
            params![now.as_millis() as i64, job_id.to_string()],
        )?;
        Ok(())
    }

    fn save_request(&self, request: &RequestRecord) -> Result<(), ServicesError> {
        let kv = serde_json::to_string(&request.kv)?;
        self.conn.lock().execute(
            "INSERT INTO request (id, job_id, name, worker, priority, state, extended_state, server_status,
                controller_create_time, controller_start_time, controller_finish_time,
                worker_receive_time, worker_start_time, worker_finish_time, kv)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, extended_state = excluded.extended_state,
                server_status = excluded.server_status, controller_start_time = excluded.controller_start_time,
                controller_finish_time = excluded.controller_finish_time, worker_receive_time = excluded.worker_receive_time,
                worker_start_time = excluded.worker_start_time, worker_finish_time = excluded.worker_finish_time, kv = excluded.kv",
            params![
                request.id.to_string(),
                request.job_id.map(|id| id.to_string()),
                request.name,
                request.worker,
                request.priority,
                request.state,
                request.extended_state,
                request.server_status,
                request.controller_create_time.as_millis() as i64,
                request.controller_start_time.as_millis() as i64,
                request.controller_finish_time.as_millis() as i64,
                request.worker_receive_time.as_millis() as i64,
                request.worker_start_time.as_millis() as i64,
                request.worker_finish_time.as_millis() as i64,
                kv,
            ],
        )?;
        Ok(())
    }

    fn update_request_state(
        &self,
        request_id: RequestId,
        target_id: Option<RequestId>,
        target_performance: Option<ServerPerformance>,
    ) -> Result<(), ServicesError> {
        let conn = self.conn.lock();
        if let Some(perf) = target_performance {
            conn.execute(
                "UPDATE request SET worker_receive_time = ?1, worker_start_time = ?2, worker_finish_time = ?3 WHERE id = ?4",
                params![
                    perf.receive_time.as_millis() as i64,
                    perf.start_time.as_millis() as i64,
                    perf.finish_time.as_millis() as i64,
                    request_id.to_string(),
                ],
            )?;
        }
        if let Some(target) = target_id {
            conn.execute(
                "UPDATE request SET server_status = ?1 WHERE id = ?2",
                params![format!("tracks:{target}"), request_id.to_string()],
            )?;
        }
        Ok(())
    }

    fn log_controller_event(&self, event: &ControllerEvent) -> Result<(), ServicesError> {
        let kv = serde_json::to_string(&event.kv)?;
        self.conn.lock().execute(
            "INSERT INTO controller_event (controller_id, ts, task, operation, status, request_id, job_id, kv)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.controller_id.to_string(),
                event.timestamp.as_millis() as i64,
                event.task,
                event.operation,
                event.status,
                event.request_id.map(|id| id.to_string()),
                event.job_id.map(|id| id.to_string()),
                kv,
            ],
        )?;
        Ok(())
    }

    fn read_controller_events(&self, controller_id: ControllerId, limit: usize) -> Result<Vec<ControllerEvent>, ServicesError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, ts, task, operation, status, request_id, job_id, kv FROM controller_event
             WHERE controller_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![controller_id.to_string(), limit as i64], |row| {
            let kv: String = row.get(7)?;
            let request_id: Option<String> = row.get(5)?;
            let job_id: Option<String> = row.get(6)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                request_id,
                job_id,
                kv,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, ts, task, operation, status, request_id, job_id, kv) = row?;
            events.push(ControllerEvent {
                id: id as u64,
                controller_id,
                timestamp: Timestamp::from_millis(ts as u64),
                task,
                operation,
                status,
                request_id: request_id.and_then(|s| s.parse().ok().map(|u: uuid::Uuid| u.into())),
                job_id: job_id.and_then(|s| s.parse().ok().map(|u: uuid::Uuid| u.into())),
                kv: serde_json::from_str(&kv)?,
            });
        }
        Ok(events)
    }

    fn save_replica_info(&self, replica: &Replica) -> Result<(), ServicesError> {
        let files = serde_json::to_string(&replica.files)?;
        self.conn.lock().execute(
            "INSERT INTO replica (worker, database, chunk, status, verify_time, files) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(worker, database, chunk) DO UPDATE SET status = excluded.status,
                verify_time = excluded.verify_time, files = excluded.files",
            params![
                replica.worker,
                replica.database,
                replica.chunk,
                Self::status_str(replica.status),
                replica.verify_time.as_millis() as i64,
                files,
            ],
        )?;
        Ok(())
    }

    fn save_replica_info_collection(&self, worker: &str, database: &str, collection: Vec<Replica>) -> Result<(), ServicesError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let keep: Vec<u32> = collection.iter().map(|r| r.chunk).collect();
            let placeholders: Vec<String> = keep.iter().map(|_| "?".to_string()).collect();
            if keep.is_empty() {
                tx.execute("DELETE FROM replica WHERE worker = ?1 AND database = ?2", params![worker, database])?;
            } else {
                let sql = format!(
                    "DELETE FROM replica WHERE worker = ? AND database = ? AND chunk NOT IN ({})",
                    placeholders.join(", ")
                );
                let mut stmt = tx.prepare(&sql)?;
                let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&worker, &database];
                for c in &keep {
                    bound.push(c);
                }
                stmt.execute(rusqlite::params_from_iter(bound))?;
            }
            for replica in &collection {
                let files = serde_json::to_string(&replica.files)?;
                tx.execute(
                    "INSERT INTO replica (worker, database, chunk, status, verify_time, files) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(worker, database, chunk) DO UPDATE SET status = excluded.status,
                        verify_time = excluded.verify_time, files = excluded.files",
                    params![
                        replica.worker,
                        replica.database,
                        replica.chunk,
                        Self::status_str(replica.status),
                        replica.verify_time.as_millis() as i64,
                        files,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn find_oldest_replicas(&self, database: &str, num_replicas: usize, enabled_workers_only: bool) -> Result<Vec<Replica>, ServicesError> {
        let conn = self.conn.lock();
        let sql = if enabled_workers_only {
            "SELECT r.worker, r.database, r.chunk, r.status, r.verify_time, r.files FROM replica r
             WHERE r.database = ?1 AND COALESCE((SELECT enabled FROM worker_enabled WHERE worker = r.worker), 1) = 1
             ORDER BY r.verify_time ASC LIMIT ?2"
        } else {
            "SELECT worker, database, chunk, status, verify_time, files FROM replica WHERE database = ?1 ORDER BY verify_time ASC LIMIT ?2"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![database, num_replicas as i64], Self::replica_row_mapper())?;
        rows.map(|r| r.map_err(ServicesError::from)).collect()
    }

    fn find_replicas(&self, database: &str, chunk: u32, enabled_only: bool) -> Result<Vec<Replica>, ServicesError> {
        let conn = self.conn.lock();
        let sql = if enabled_only {
            "SELECT r.worker, r.database, r.chunk, r.status, r.verify_time, r.files FROM replica r
             WHERE r.database = ?1 AND r.chunk = ?2 AND COALESCE((SELECT enabled FROM worker_enabled WHERE worker = r.worker), 1) = 1"
        } else {
            "SELECT worker, database, chunk, status, verify_time, files FROM replica WHERE database = ?1 AND chunk = ?2"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![database, chunk], Self::replica_row_mapper())?;
        rows.map(|r| r.map_err(ServicesError::from)).collect()
    }

    fn find_replicas_for_chunks(&self, database: &str, chunks: &[u32], enabled_only: bool) -> Result<Vec<Replica>, ServicesError> {
        let mut out = Vec::new();
        for &chunk in chunks {
            out.extend(self.find_replicas(database, chunk, enabled_only)?);
        }
        Ok(out)
    }

    fn find_worker_replicas(&self, worker: &str, database: Option<&str>) -> Result<Vec<Replica>, ServicesError> {
        let conn = self.conn.lock();
        let rows: Vec<Replica> = if let Some(database) = database {
            let mut stmt = conn.prepare("SELECT worker, database, chunk, status, verify_time, files FROM replica WHERE worker = ?1 AND database = ?2")?;
            stmt.query_map(params![worker, database], Self::replica_row_mapper())?
                .collect::<Result<_, _>>()?
        } else {
            let mut stmt = conn.prepare("SELECT worker, database, chunk, status, verify_time, files FROM replica WHERE worker = ?1")?;
            stmt.query_map(params![worker], Self::replica_row_mapper())?.collect::<Result<_, _>>()?
        };
        Ok(rows)
    }

    fn num_worker_replicas(&self, worker: &str, database: Option<&str>) -> Result<u64, ServicesError> {
        Ok(self.find_worker_replicas(worker, database)?.len() as u64)
    }

    fn find_database_chunks(&self, database: &str) -> Result<Vec<u32>, ServicesError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT chunk FROM replica WHERE database = ?1 ORDER BY chunk ASC")?;
        let rows = stmt.query_map(params![database], |row| row.get::<_, u32>(0))?;
        rows.map(|r| r.map_err(ServicesError::from)).collect()
    }

    fn find_database_replicas(&self, database: &str) -> Result<Vec<Replica>, ServicesError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT worker, database, chunk, status, verify_time, files FROM replica WHERE database = ?1")?;
        let rows = stmt.query_map(params![database], Self::replica_row_mapper())?;
        rows.map(|r| r.map_err(ServicesError::from)).collect()
    }

    fn actual_replication_level(&self, database: &str, exclude_workers: &[String]) -> Result<ReplicationLevelHistogram, ServicesError> {
        let replicas = self.find_database_replicas(database)?;
        let mut per_chunk: std::collections::HashMap<u32, u64> = std::collections::HashMap::new();
        for replica in replicas.iter().filter(|r| r.is_complete() && !exclude_workers.contains(&r.worker)) {
            *per_chunk.entry(replica.chunk).or_insert(0) += 1;
        }
        let mut histogram = ReplicationLevelHistogram::new();
        for level in per_chunk.values() {
            *histogram.entry(*level as u32).or_insert(0) += 1;
        }
        Ok(histogram)
    }

    fn num_orphan_chunks(&self, database: &str, unique_on_workers: bool) -> Result<u64, ServicesError> {
        let replicas = self.find_database_replicas(database)?;
        let mut per_chunk: std::collections::HashMap<u32, u64> = std::collections::HashMap::new();
        for replica in replicas.iter().filter(|r| r.is_complete()) {
            *per_chunk.entry(replica.chunk).or_insert(0) += 1;
        }
        let threshold = if unique_on_workers { 1 } else { 0 };
        Ok(per_chunk.values().filter(|&&count| count <= threshold).count() as u64)
    }

    fn enabled_workers(&self) -> Result<Vec<String>, ServicesError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT worker FROM (
                SELECT worker FROM replica
                UNION
                SELECT worker FROM worker_enabled
             ) w WHERE COALESCE((SELECT enabled FROM worker_enabled WHERE worker = w.worker), 1) = 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map_err(ServicesError::from)).collect()
    }

    fn set_worker_enabled(&self, worker: &str, enabled: bool) -> Result<(), ServicesError> {
        self.conn.lock().execute(
            "INSERT INTO worker_enabled (worker, enabled) VALUES (?1, ?2)
             ON CONFLICT(worker) DO UPDATE SET enabled = excluded.enabled",
            params![worker, enabled as i64],
        )?;
        Ok(())
    }

    fn create_transaction(&self, database: &str) -> Result<(Transaction, NamedMutexGuard), ServicesError> {
        let now = Timestamp::now();
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO txn (id, database, state, begin_time, start_time, transition_time, end_time, context, log)
                 VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
                params![
                    database,
                    "IsStarting",
                    now.as_millis() as i64,
                    Timestamp::UNSET.as_millis() as i64,
                    now.as_millis() as i64,
                    Timestamp::UNSET.as_millis() as i64,
                    "[]",
                ],
            )?;
            conn.last_insert_rowid() as u64
        };
        let id = TransactionId::new(id);
        let guard = self.named_mutexes.lock(&format!("transaction:{id}"));
        Ok((Transaction::new(id, database, now), guard))
    }

    fn update_transaction(&self, id: TransactionId, to: TransactionState) -> Result<Transaction, ServicesError> {
        let _guard = self.named_mutexes.lock(&format!("transaction:{id}"));
        let conn = self.conn.lock();
        let mut txn = Self::load_transaction(&conn, id)?.ok_or(ServicesError::UnknownTransaction(id.get()))?;
        txn.transition(to, Timestamp::now())?;
        let log = serde_json::to_string(&txn.log)?;
        conn.execute(
            "UPDATE txn SET state = ?1, start_time = ?2, transition_time = ?3, end_time = ?4, log = ?5 WHERE id = ?6",
            params![
                format!("{:?}", txn.state),
                txn.start_time.as_millis() as i64,
                txn.transition_time.as_millis() as i64,
                txn.end_time.as_millis() as i64,
                log,
                id.get() as i64,
            ],
        )?;
        Ok(txn)
    }

    fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, ServicesError> {
        let conn = self.conn.lock();
        Self::load_transaction(&conn, id)
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
        let now = Timestamp::now();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO transaction_contrib (id, transaction_id, worker, database, table_name, chunk, is_overlap, url,
                is_async, charset, status, create_time, start_time, read_time, load_time, num_bytes, num_rows,
                num_rows_loaded, num_warnings, http_error, system_error, error, retry_allowed, tmp_file)
             VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, 'InProgress', ?9, ?10, ?10, ?10, 0, 0, 0, 0, NULL, NULL, NULL, 1, NULL)",
            params![
                transaction_id.get() as i64,
                worker,
                database,
                table,
                chunk,
                is_overlap as i64,
                url,
                charset,
                now.as_millis() as i64,
                Timestamp::UNSET.as_millis() as i64,
            ],
        )?;
        let id = ContributionId::new(conn.last_insert_rowid() as u64);
        Ok(Contribution::created(id, transaction_id, worker, database, table, chunk, is_overlap, url, charset, now))
    }

    fn started_contribution(&self, id: ContributionId, tmp_file: &str) -> Result<Contribution, ServicesError> {
        self.update_contribution(id, |c| c.started(tmp_file, Timestamp::now()))
    }

    fn read_contribution(&self, id: ContributionId, num_bytes: u64, num_rows: u64) -> Result<Contribution, ServicesError> {
        self.update_contribution(id, |c| c.read(num_bytes, num_rows, Timestamp::now()))
    }

    fn loaded_contribution(&self, id: ContributionId, num_rows_loaded: u64, num_warnings: u32) -> Result<Contribution, ServicesError> {
        self.update_contribution(id, |c| c.loaded(num_rows_loaded, num_warnings, Timestamp::now()))
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
        let now = Timestamp::now();
        self.update_contribution(id, move |c| c.failed(stage, http_error, system_error, error, retry_allowed, now))
    }

    fn table_row_stats(&self, database: &str, table: &str) -> Result<Vec<(u32, u64)>, ServicesError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chunk, rows FROM table_row_stats WHERE database = ?1 AND table_name = ?2")?;
        let rows = stmt.query_map(params![database, table], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)? as u64)))?;
        rows.map(|r| r.map_err(ServicesError::from)).collect()
    }

    fn save_table_row_stats(&self, database: &str, table: &str, chunk: u32, rows: u64) -> Result<(), ServicesError> {
        self.conn.lock().execute(
            "INSERT INTO table_row_stats (database, table_name, chunk, rows) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(database, table_name, chunk) DO UPDATE SET rows = excluded.rows",
            params![database, table, chunk, rows as i64],
        )?;
        Ok(())
    }

    fn delete_table_row_stats(&self, database: &str, table: &str, chunk: Option<u32>) -> Result<(), ServicesError> {
        let conn = self.conn.lock();
        match chunk {
            Some(chunk) => conn.execute(
                "DELETE FROM table_row_stats WHERE database = ?1 AND table_name = ?2 AND chunk = ?3",
                params![database, table, chunk],
            )?,
            None => conn.execute("DELETE FROM table_row_stats WHERE database = ?1 AND table_name = ?2", params![database, table])?,
        };
        Ok(())
    }
}

impl SqliteDatabaseServices {
    #[allow(clippy::type_complexity)]
    fn replica_row_mapper() -> impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<Replica> {
        |row| {
            let worker: String = row.get(0)?;
            let database: String = row.get(1)?;
            let chunk: u32 = row.get(2)?;
            let status: String = row.get(3)?;
            let verify_time: i64 = row.get(4)?;
            let files: String = row.get(5)?;
            Self::row_to_replica(worker, database, chunk, status, verify_time, files)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        }
    }

    fn load_transaction(conn: &Connection, id: TransactionId) -> Result<Option<Transaction>, ServicesError> {
        let row = conn
            .query_row(
                "SELECT database, state, begin_time, start_time, transition_time, end_time, context, log FROM txn WHERE id = ?1",
                params![id.get() as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((database, state, begin_time, start_time, transition_time, end_time, context, log)) = row else {
            return Ok(None);
        };
        let state = parse_transaction_state(&state);
        let context: Option<serde_json::Value> = context.map(|c| serde_json::from_str(&c)).transpose()?;
        let log: Vec<TransactionLogEntry> = serde_json::from_str(&log)?;
        Ok(Some(Transaction {
            id,
            database,
            state,
            begin_time: Timestamp::from_millis(begin_time as u64),
            start_time: Timestamp::from_millis(start_time as u64),
            transition_time: Timestamp::from_millis(transition_time as u64),
            end_time: Timestamp::from_millis(end_time as u64),
            context,
            log,
        }))
    }

    fn load_contribution(conn: &Connection, id: ContributionId) -> Result<Option<Contribution>, ServicesError> {
        conn.query_row(
            "SELECT transaction_id, worker, database, table_name, chunk, is_overlap, url, is_async, charset, status,
                create_time, start_time, read_time, load_time, num_bytes, num_rows, num_rows_loaded, num_warnings,
                http_error, system_error, error, retry_allowed, tmp_file
             FROM transaction_contrib WHERE id = ?1",
            params![id.get() as i64],
            |row| {
                Ok(Contribution {
                    id,
                    transaction_id: TransactionId::new(row.get::<_, i64>(0)? as u64),
                    worker: row.get(1)?,
                    database: row.get(2)?,
                    table: row.get(3)?,
                    chunk: row.get::<_, Option<u32>>(4)?,
                    is_overlap: row.get::<_, i64>(5)? != 0,
                    url: row.get(6)?,
                    is_async: row.get::<_, i64>(7)? != 0,
                    charset: row.get(8)?,
                    status: parse_contribution_status(&row.get::<_, String>(9)?),
                    create_time: Timestamp::from_millis(row.get::<_, i64>(10)? as u64),
                    start_time: Timestamp::from_millis(row.get::<_, i64>(11)? as u64),
                    read_time: Timestamp::from_millis(row.get::<_, i64>(12)? as u64),
                    load_time: Timestamp::from_millis(row.get::<_, i64>(13)? as u64),
                    num_bytes: row.get::<_, i64>(14)? as u64,
                    num_rows: row.get::<_, i64>(15)? as u64,
                    num_rows_loaded: row.get::<_, i64>(16)? as u64,
                    num_warnings: row.get::<_, i64>(17)? as u32,
                    http_error: row.get::<_, Option<i64>>(18)?.map(|v| v as u32),
                    system_error: row.get::<_, Option<i64>>(19)?.map(|v| v as i32),
                    error: row.get(20)?,
                    retry_allowed: row.get::<_, i64>(21)? != 0,
                    tmp_file: row.get(22)?,
                })
            },
        )
        .optional()
        .map_err(ServicesError::from)
    }

    fn update_contribution(&self, id: ContributionId, f: impl FnOnce(&mut Contribution)) -> Result<Contribution, ServicesError> {
        let conn = self.conn.lock();
        let mut c = Self::load_contribution(&conn, id)?.ok_or(ServicesError::UnknownContribution(id.get()))?;
        f(&mut c);
        conn.execute(
            "UPDATE transaction_contrib SET status = ?1, start_time = ?2, read_time = ?3, load_time = ?4, num_bytes = ?5,
                num_rows = ?6, num_rows_loaded = ?7, num_warnings = ?8, http_error = ?9, system_error = ?10, error = ?11,
                retry_allowed = ?12, tmp_file = ?13 WHERE id = ?14",
            params![
                format!("{:?}", c.status),
                c.start_time.as_millis() as i64,
                c.read_time.as_millis() as i64,
                c.load_time.as_millis() as i64,
                c.num_bytes as i64,
                c.num_rows as i64,
                c.num_rows_loaded as i64,
                c.num_warnings,
                c.http_error,
                c.system_error,
                c.error,
                c.retry_allowed as i64,
                c.tmp_file,
                id.get() as i64,
            ],
        )?;
        Ok(c)
    }
}

fn parse_transaction_state(s: &str) -> TransactionState {
    match s {
        "Started" => TransactionState::Started,
        "IsFinishing" => TransactionState::IsFinishing,
        "IsAborting" => TransactionState::IsAborting,
        "Finished" => TransactionState::Finished,
        "Aborted" => TransactionState::Aborted,
        "StartFailed" => TransactionState::StartFailed,
        "FinishFailed" => TransactionState::FinishFailed,
        "AbortFailed" => TransactionState::AbortFailed,
        _ => TransactionState::IsStarting,
    }
}

fn parse_contribution_status(s: &str) -> ContributionStatus {
    match s {
        "Finished" => ContributionStatus::Finished,
        "CreateFailed" => ContributionStatus::CreateFailed,
        "StartFailed" => ContributionStatus::StartFailed,
        "ReadFailed" => ContributionStatus::ReadFailed,
        "LoadFailed" => ContributionStatus::LoadFailed,
        "Cancelled" => ContributionStatus::Cancelled,
        _ => ContributionStatus::InProgress,
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
            verify_time: Timestamp::from_millis(1),
            files: Vec::new(),
        }
    }

    #[test]
    fn replica_round_trips_through_sqlite() {
        let services = SqliteDatabaseServices::open_in_memory().unwrap();
        services.save_replica_info(&complete_replica("w1", "db", 4)).unwrap();
        let found = services.find_replicas("db", 4, false).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].worker, "w1");
        assert!(found[0].is_complete());
    }

    #[test]
    fn resync_deletes_chunks_absent_from_new_collection() {
        let services = SqliteDatabaseServices::open_in_memory().unwrap();
        services
            .save_replica_info_collection("w1", "db", vec![complete_replica("w1", "db", 1), complete_replica("w1", "db", 2)])
            .unwrap();
        services.save_replica_info_collection("w1", "db", vec![complete_replica("w1", "db", 1)]).unwrap();
        let remaining = services.find_worker_replicas("w1", Some("db")).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].chunk, 1);
    }

    #[test]
    fn transaction_and_contribution_lifecycle_persist() {
        let services = SqliteDatabaseServices::open_in_memory().unwrap();
        let (txn, guard) = services.create_transaction("db").unwrap();
        drop(guard);
        let txn = services.update_transaction(txn.id, TransactionState::Started).unwrap();
        assert_eq!(txn.state, TransactionState::Started);

        let contrib = services.create_contribution(txn.id, "w1", "db", "Object", Some(4), false, "file:///x.csv", "utf8").unwrap();
        services.started_contribution(contrib.id, "/tmp/x.tmp").unwrap();
        services.read_contribution(contrib.id, 100, 3).unwrap();
        let loaded = services.loaded_contribution(contrib.id, 3, 0).unwrap();
        assert_eq!(loaded.status, ContributionStatus::Finished);
        assert!(!loaded.retry_allowed);
    }

    #[test]
    fn worker_enablement_defaults_to_enabled() {
        let services = SqliteDatabaseServices::open_in_memory().unwrap();
        services.save_replica_info(&complete_replica("w1", "db", 1)).unwrap();
        assert!(services.enabled_workers().unwrap().contains(&"w1".to_string()));
        services.set_worker_enabled("w1", false).unwrap();
        assert!(!services.enabled_workers().unwrap().contains(&"w1".to_string()));
    }
}
