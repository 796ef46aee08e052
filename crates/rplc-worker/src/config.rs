use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// The three file extensions a chunk table contributes (spec.md §3).
const TABLE_EXTENSIONS: [&str; 3] = ["MYD", "MYI", "frm"];

/// Worker-local configuration naming, per spec.md §4.3, "the set of files
/// that must exist for `(database, chunk)` from configuration": the list
/// of base table names per database, plus the directories the worker
/// serves replicas out of.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_name: String,
    pub bind_addr: SocketAddr,
    pub replica_root: PathBuf,
    pub scratch_dir: PathBuf,
    /// `database -> [base table name, ...]`. Each table contributes a
    /// `.MYD`/`.MYI`/`.frm` triple (spec.md §3's file naming convention).
    pub tables: HashMap<String, Vec<String>>,
    /// `worker name -> file-copy service address`, consulted by Replicate
    /// (spec.md §4.3, step 2) to resolve the peer a chunk is pulled from.
    pub peers: HashMap<String, SocketAddr>,
}

impl WorkerConfig {
    pub fn new(worker_name: impl Into<String>, bind_addr: SocketAddr, replica_root: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_name: worker_name.into(),
            bind_addr,
            replica_root: replica_root.into(),
            scratch_dir: scratch_dir.into(),
            tables: HashMap::new(),
            peers: HashMap::new(),
        }
    }

    pub fn with_table(mut self, database: impl Into<String>, table: impl Into<String>) -> Self {
        self.tables.entry(database.into()).or_default().push(table.into());
        self
    }

    pub fn with_peer(mut self, worker: impl Into<String>, addr: SocketAddr) -> Self {
        self.peers.insert(worker.into(), addr);
        self
    }

    pub fn peer_addr(&self, worker: &str) -> Option<SocketAddr> {
        self.peers.get(worker).copied()
    }

    pub fn chunk_dir(&self, database: &str) -> PathBuf {
        self.replica_root.join(database)
    }

    /// The ordered list of file names expected for `(database, chunk)`
    /// (spec.md §4.3's Find algorithm, step 1). `isOverlap` variants are
    /// never expected by default — overlap tables are optional add-ons a
    /// caller can still observe via `FindAll`, but they are not part of
    /// what makes a chunk `COMPLETE`.
    pub fn expected_files(&self, database: &str, chunk: u32) -> Option<Vec<String>> {
        let tables = self.tables.get(database)?;
        let mut names = Vec::new();
        for table in tables {
            for ext in TABLE_EXTENSIONS {
                names.push(format!("{table}_{chunk}.{ext}"));
            }
        }
        Some(names)
    }

    pub fn databases_with_chunk_dirs(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    pub fn database_dir_entries(&self, database: &str) -> std::io::Result<Vec<std::fs::DirEntry>> {
        let dir = self.chunk_dir(database);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        std::fs::read_dir(dir)?.collect()
    }

    pub fn file_path(&self, database: &str, file_name: &str) -> PathBuf {
        self.chunk_dir(database).join(file_name)
    }

    pub fn scratch_path(&self, unique: &str) -> PathBuf {
        self.scratch_dir.join(unique)
    }
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}
