use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use rplc_job::{ExtendedState, JobContext, MoveReplicaJob, RebalanceJob, ReplicateJob};
use rplc_messenger::Messenger;
use rplc_services::{ChunkLockRegistry, DatabaseServices, MemoryDatabaseServices};
use rplc_types::{ControllerId, DatabaseFamily, FakeClock};
use rplc_worker::{WorkerConfig, WorkerServer};

fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn start_worker(name: &str, addr: SocketAddr, tables: &[(&str, &[&str])]) -> (Arc<WorkerConfig>, WorkerServer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WorkerConfig::new(name, addr, dir.path(), dir.path().join("scratch"));
    for (database, table_list) in tables {
        for table in *table_list {
            config = config.with_table(*database, *table);
        }
    }
    let config = Arc::new(config);
    let server = WorkerServer::start(config.clone(), 2).unwrap();
    (config, server, dir)
}

fn touch_chunk_files(config: &WorkerConfig, database: &str, chunk: u32) {
    rplc_worker::ensure_dir(&config.chunk_dir(database)).unwrap();
    for name in config.expected_files(database, chunk).unwrap() {
        std::fs::write(config.file_path(database, &name), b"x").unwrap();
    }
}

fn new_context(worker_addrs: HashMap<String, SocketAddr>, services: Arc<dyn DatabaseServices>) -> JobContext {
    JobContext {
        services,
        messenger: Arc::new(Messenger::start().unwrap()),
        chunk_locks: Arc::new(ChunkLockRegistry::new()),
        clock: Arc::new(FakeClock::new(1)),
        worker_addrs,
        instance_id: "test".to_string(),
        request_timeout: Duration::from_secs(5),
        controller_id: ControllerId::new(),
    }
}

/// spec.md §8 scenario 2: replicate a chunk present on a single worker up
/// to a target replication level of two.
#[test]
fn replicate_reaches_target_two() {
    let addr1 = free_addr();
    let addr2 = free_addr();
    let addr3 = free_addr();
    let (config1, _s1, _d1) = start_worker("w1", addr1, &[("db", &["t"])]);
    let (_config2, _s2, _d2) = start_worker("w2", addr2, &[("db", &["t"])]);
    let (_config3, _s3, _d3) = start_worker("w3", addr3, &[("db", &["t"])]);
    touch_chunk_files(&config1, "db", 5);
    std::thread::sleep(Duration::from_millis(100));

    let mut worker_addrs = HashMap::new();
    worker_addrs.insert("w1".to_string(), addr1);
    worker_addrs.insert("w2".to_string(), addr2);
    worker_addrs.insert("w3".to_string(), addr3);
    let services: Arc<dyn DatabaseServices> = Arc::new(MemoryDatabaseServices::new());
    let ctx = new_context(worker_addrs, services);

    let family = DatabaseFamily::new("f", vec!["db".to_string()], 1);
    let job = ReplicateJob::new(ctx.controller_id, None, 0, family, 2);
    let outcome = job.run(&ctx).unwrap();
    assert_eq!(outcome, ExtendedState::Success);
}

/// spec.md §8 scenario 3: move a chunk to a new worker and purge the
/// original copy, leaving exactly one good replica afterwards.
#[test]
fn move_with_purge_relocates_chunk() {
    let addr1 = free_addr();
    let addr2 = free_addr();
    let (config1, _s1, _d1) = start_worker("w1", addr1, &[("db", &["t"])]);
    let (_config2, _s2, _d2) = start_worker("w2", addr2, &[("db", &["t"])]);
    touch_chunk_files(&config1, "db", 9);
    std::thread::sleep(Duration::from_millis(100));

    let mut worker_addrs = HashMap::new();
    worker_addrs.insert("w1".to_string(), addr1);
    worker_addrs.insert("w2".to_string(), addr2);
    let services: Arc<dyn DatabaseServices> = Arc::new(MemoryDatabaseServices::new());
    services.set_worker_enabled("w1", true).unwrap();
    services.set_worker_enabled("w2", true).unwrap();
    let ctx = new_context(worker_addrs, services);

    let family = DatabaseFamily::new("f", vec!["db".to_string()], 1);
    let job = MoveReplicaJob::new(ctx.controller_id, None, 0, family, 9, "w1".to_string(), "w2".to_string(), true);
    let outcome = job.run(&ctx).unwrap();
    assert_eq!(outcome, ExtendedState::Success);
    assert!(!ctx.chunk_locks.is_locked("f", 9));
}

/// spec.md §8 scenario 4: a rebalance plan moves chunks off the hottest
/// worker onto the coldest workers without duplicating any chunk, leaving
/// every worker's good-chunk count equal to the family average.
#[test]
fn rebalance_plan_preserves_replication_count() {
    let addr1 = free_addr();
    let addr2 = free_addr();
    let addr3 = free_addr();
    let addr4 = free_addr();
    let (config1, _s1, _d1) = start_worker("w1", addr1, &[("db", &["t"])]);
    let (_config2, _s2, _d2) = start_worker("w2", addr2, &[("db", &["t"])]);
    let (_config3, _s3, _d3) = start_worker("w3", addr3, &[("db", &["t"])]);
    let (_config4, _s4, _d4) = start_worker("w4", addr4, &[("db", &["t"])]);
    touch_chunk_files(&config1, "db", 1);
    touch_chunk_files(&config1, "db", 2);
    touch_chunk_files(&config1, "db", 3);
    touch_chunk_files(&config1, "db", 4);
    std::thread::sleep(Duration::from_millis(100));

    let mut worker_addrs = HashMap::new();
    worker_addrs.insert("w1".to_string(), addr1);
    worker_addrs.insert("w2".to_string(), addr2);
    worker_addrs.insert("w3".to_string(), addr3);
    worker_addrs.insert("w4".to_string(), addr4);
    let services: Arc<dyn DatabaseServices> = Arc::new(MemoryDatabaseServices::new());
    for worker in ["w1", "w2", "w3", "w4"] {
        services.set_worker_enabled(worker, true).unwrap();
    }
    let ctx = new_context(worker_addrs, services);

    let family = DatabaseFamily::new("f", vec!["db".to_string()], 1);
    let job = RebalanceJob::new(ctx.controller_id, None, 0, family, true, 2);
    let outcome = job.run(&ctx).unwrap();
    assert_eq!(outcome, ExtendedState::Success);

    let plan = job.plan();
    assert_eq!(plan.len(), 3);
    assert!(plan.iter().all(|entry| entry.source_worker == "w1"));
    let mut destinations: Vec<&str> = plan.iter().map(|e| e.destination_worker.as_str()).collect();
    destinations.sort_unstable();
    assert_eq!(destinations, vec!["w2", "w3", "w4"]);
    let mut chunks: Vec<u32> = plan.iter().map(|e| e.chunk).collect();
    chunks.sort_unstable();
    assert_eq!(chunks, vec![1, 2, 3]);
}
