//! End-to-end ingest connection scenarios (spec.md §8's transaction
//! happy-path, plus the handshake failure taxonomy) driven over a real
//! loopback `TcpStream`, exercising [`rplc_ingest::IngestServer`] exactly
//! as a real ingest client would.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rplc_ingest::{IngestConnectionConfig, IngestServer, NullTableLoader, SqliteTableLoader};
use rplc_services::{DatabaseServices, MemoryDatabaseServices, TransactionState};
use rplc_wire::ingest::{CsvDialect, IngestData, IngestHandshakeRequest, IngestResponse, IngestStatus};
use rplc_wire::Frame;

const AUTH_KEY: &str = "test-auth-key";

fn start_server(loader: Arc<dyn rplc_ingest::TableLoader>) -> (IngestServer, std::net::SocketAddr, Arc<dyn DatabaseServices>, tempfile::TempDir) {
    let services: Arc<dyn DatabaseServices> = Arc::new(MemoryDatabaseServices::new());
    let scratch = tempfile::tempdir().unwrap();
    let config = Arc::new(IngestConnectionConfig {
        auth_key: AUTH_KEY.to_string(),
        scratch_dir: scratch.path().to_path_buf(),
        worker: "worker1".to_string(),
    });
    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = std::net::TcpListener::bind(addr).unwrap();
    let bound = listener.local_addr().unwrap();
    drop(listener);
    let server = IngestServer::start(bound, services.clone(), loader, config).unwrap();
    // Give the accept loop a moment to start polling before the first connect.
    std::thread::sleep(Duration::from_millis(50));
    (server, bound, services, scratch)
}

fn handshake(table: &str, transaction_id: u64, chunk: Option<u32>) -> IngestHandshakeRequest {
    IngestHandshakeRequest {
        auth_key: AUTH_KEY.to_string(),
        transaction_id,
        table: table.to_string(),
        chunk,
        is_overlap: false,
        url: "file:///dev/stdin".to_string(),
        dialect_input: CsvDialect::default(),
        charset_name: "UTF8".to_string(),
        max_num_warnings: 0,
    }
}

#[test]
fn happy_path_ingests_a_small_csv_payload() {
    let catalog_dir = tempfile::tempdir().unwrap();
    let loader: Arc<SqliteTableLoader> =
        Arc::new(SqliteTableLoader::open(catalog_dir.path().join("catalog.sqlite")).unwrap());
    loader.register_table("test_db", "Object");
    let (server, addr, services, _scratch) = start_server(loader);

    let (transaction, _guard) = services.create_transaction("test_db").unwrap();
    services.update_transaction(transaction.id, TransactionState::Started).unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    Frame::write(&mut stream, &handshake("Object", transaction.id.get(), Some(4))).unwrap();
    let ready: IngestResponse = Frame::read(&mut stream).unwrap();
    assert_eq!(ready.status, IngestStatus::ReadyToReadData);
    let contribution_id = ready.id;

    Frame::write(&mut stream, &IngestData { data: b"1,alpha\n2,beta\n3,gamma\n".to_vec(), last: true }).unwrap();
    let finished: IngestResponse = Frame::read(&mut stream).unwrap();

    assert_eq!(finished.status, IngestStatus::Finished);
    assert_eq!(finished.id, contribution_id);
    assert_eq!(finished.num_rows, 3);
    assert_eq!(finished.num_rows_loaded, 3);
    assert!(!finished.retry_allowed);

    drop(server);
}

#[test]
fn streamed_packets_are_acknowledged_before_the_final_one() {
    let loader: Arc<NullTableLoader> = Arc::new(NullTableLoader);
    let (server, addr, services, _scratch) = start_server(loader);

    let (transaction, _guard) = services.create_transaction("test_db").unwrap();
    services.update_transaction(transaction.id, TransactionState::Started).unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    Frame::write(&mut stream, &handshake("Object", transaction.id.get(), None)).unwrap();
    let ready: IngestResponse = Frame::read(&mut stream).unwrap();
    assert_eq!(ready.status, IngestStatus::ReadyToReadData);

    Frame::write(&mut stream, &IngestData { data: b"1,alpha\n".to_vec(), last: false }).unwrap();
    let ack: IngestResponse = Frame::read(&mut stream).unwrap();
    assert_eq!(ack.status, IngestStatus::ReadyToReadData);

    Frame::write(&mut stream, &IngestData { data: b"2,beta\n".to_vec(), last: true }).unwrap();
    let finished: IngestResponse = Frame::read(&mut stream).unwrap();
    assert_eq!(finished.status, IngestStatus::Finished);
    assert_eq!(finished.num_rows, 2);

    drop(server);
}

#[test]
fn bad_auth_key_is_rejected_before_any_contribution_exists() {
    let loader: Arc<NullTableLoader> = Arc::new(NullTableLoader);
    let (server, addr, services, _scratch) = start_server(loader);

    let (transaction, _guard) = services.create_transaction("test_db").unwrap();
    services.update_transaction(transaction.id, TransactionState::Started).unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    let mut bad = handshake("Object", transaction.id.get(), None);
    bad.auth_key = "wrong".to_string();
    Frame::write(&mut stream, &bad).unwrap();
    let response: IngestResponse = Frame::read(&mut stream).unwrap();

    assert_eq!(response.status, IngestStatus::Failed);
    assert_eq!(response.id, 0);
    assert!(!response.retry_allowed);

    drop(server);
}

#[test]
fn unknown_transaction_is_rejected_before_any_contribution_exists() {
    let loader: Arc<NullTableLoader> = Arc::new(NullTableLoader);
    let (server, addr, _services, _scratch) = start_server(loader);

    let mut stream = TcpStream::connect(addr).unwrap();
    Frame::write(&mut stream, &handshake("Object", 999, None)).unwrap();
    let response: IngestResponse = Frame::read(&mut stream).unwrap();

    assert_eq!(response.status, IngestStatus::Failed);
    assert_eq!(response.id, 0);

    drop(server);
}

#[test]
fn transaction_not_started_fails_as_create_failed() {
    let loader: Arc<NullTableLoader> = Arc::new(NullTableLoader);
    let (server, addr, services, _scratch) = start_server(loader);

    // Left in IsStarting: never transitioned to Started.
    let (transaction, _guard) = services.create_transaction("test_db").unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    Frame::write(&mut stream, &handshake("Object", transaction.id.get(), None)).unwrap();
    let response: IngestResponse = Frame::read(&mut stream).unwrap();

    assert_eq!(response.status, IngestStatus::Failed);
    assert_ne!(response.id, 0, "a contribution row should have been created once the transaction was found");
    assert!(response.retry_allowed);

    drop(server);
}

#[test]
fn unknown_table_fails_as_start_failed() {
    let loader: Arc<NullUnknownTableLoader> = Arc::new(NullUnknownTableLoader);
    let (server, addr, services, _scratch) = start_server(loader);

    let (transaction, _guard) = services.create_transaction("test_db").unwrap();
    services.update_transaction(transaction.id, TransactionState::Started).unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    Frame::write(&mut stream, &handshake("NoSuchTable", transaction.id.get(), None)).unwrap();
    let response: IngestResponse = Frame::read(&mut stream).unwrap();

    assert_eq!(response.status, IngestStatus::Failed);
    assert_ne!(response.id, 0);
    assert!(response.retry_allowed);

    drop(server);
}

#[test]
fn unsupported_url_scheme_fails_as_start_failed() {
    let loader: Arc<NullTableLoader> = Arc::new(NullTableLoader);
    let (server, addr, services, _scratch) = start_server(loader);

    let (transaction, _guard) = services.create_transaction("test_db").unwrap();
    services.update_transaction(transaction.id, TransactionState::Started).unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    let mut req = handshake("Object", transaction.id.get(), None);
    req.url = "http://example.com/data.csv".to_string();
    Frame::write(&mut stream, &req).unwrap();
    let response: IngestResponse = Frame::read(&mut stream).unwrap();

    assert_eq!(response.status, IngestStatus::Failed);
    assert!(response.retry_allowed);

    drop(server);
}

/// A loader that reports every table as unknown, to exercise the
/// table-existence failure path without registering anything.
struct NullUnknownTableLoader;
impl rplc_ingest::TableLoader for NullUnknownTableLoader {
    fn table_exists(&self, _database: &str, _table: &str) -> bool {
        false
    }
    fn load(&self, spec: &rplc_ingest::LoadSpec) -> Result<rplc_ingest::LoadOutcome, rplc_ingest::IngestError> {
        Ok(rplc_ingest::LoadOutcome { num_rows_loaded: spec.row_count, num_warnings: 0 })
    }
}
