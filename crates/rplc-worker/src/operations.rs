use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rplc_types::{FileInfo, Replica, ReplicaStatus, Timestamp};

use crate::checksum::{checksum_file, ResumableChecksum};
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::file_protocol::PeerFileSource;

fn io_err(path: impl Into<String>) -> impl Fn(std::io::Error) -> WorkerError {
    let path = path.into();
    move |source| WorkerError::Io { path: path.clone(), source }
}

/// **Find** (spec.md §4.3): enumerates the expected files for
/// `(database, chunk)`, stats each, optionally checksums it, and derives
/// the replica's overall status. `compute_check_sum` is always honored by
/// this implementation (spec.md §9's resolved Open Question (c)).
pub fn find_replica(config: &WorkerConfig, database: &str, chunk: u32, compute_check_sum: bool) -> Result<Replica, WorkerError> {
    let expected = config.expected_files(database, chunk).ok_or_else(|| WorkerError::UnknownDatabase(database.to_string()))?;
    let dir = config.chunk_dir(database);
    let mut files = Vec::new();
    let mut present = 0usize;

    for name in &expected {
        let path = dir.join(name);
        match std::fs::metadata(&path) {
            Ok(meta) => {
                present += 1;
                let mtime = meta.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| Timestamp::from_millis(d.as_millis() as u64)).unwrap_or(Timestamp::UNSET);
                let cs = if compute_check_sum {
                    checksum_file(&path).map_err(io_err(path.display().to_string()))?
                } else {
                    String::new()
                };
                files.push(FileInfo::new(name.clone(), meta.len(), mtime, cs));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(path.display().to_string())(e)),
        }
    }

    let status = if present == 0 {
        ReplicaStatus::NotFound
    } else if present == expected.len() {
        ReplicaStatus::Complete
    } else {
        ReplicaStatus::Incomplete
    };

    Ok(Replica { worker: config.worker_name.clone(), database: database.to_string(), chunk, status, verify_time: Timestamp::now(), files })
}

/// **FindAll** (spec.md §4.3): the above for every chunk present in the
/// database directory.
pub fn find_all_replicas(config: &WorkerConfig, database: &str) -> Result<Vec<Replica>, WorkerError> {
    if !config.tables.contains_key(database) {
        return Err(WorkerError::UnknownDatabase(database.to_string()));
    }
    let entries = config.database_dir_entries(database).map_err(io_err(database.to_string()))?;
    let mut chunks = std::collections::BTreeSet::new();
    for entry in entries {
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(parsed) = rplc_types::ChunkFileName::parse(name) {
                chunks.insert(parsed.chunk);
            }
        }
    }
    chunks.into_iter().map(|chunk| find_replica(config, database, chunk, false)).collect()
}

/// **Delete** (spec.md §4.3): renames every file for `(database, chunk)`
/// aside, then unlinks the renamed copies. Partial failure leaves the
/// `.deleted-*` siblings in place and is reported `CORRUPT` rather than as
/// an error, so the catalog resyncs against reality instead of trusting a
/// half-finished delete.
pub fn delete_replica(config: &WorkerConfig, database: &str, chunk: u32) -> Result<Replica, WorkerError> {
    let expected = config.expected_files(database, chunk).ok_or_else(|| WorkerError::UnknownDatabase(database.to_string()))?;
    let dir = config.chunk_dir(database);
    let mut renamed = Vec::new();
    let mut corrupt = false;

    for name in &expected {
        let path = dir.join(name);
        if !path.exists() {
            continue;
        }
        let aside = dir.join(format!("{name}.deleted-{}", uuid::Uuid::new_v4()));
        if std::fs::rename(&path, &aside).is_err() {
            corrupt = true;
            continue;
        }
        renamed.push(aside);
    }

    for path in &renamed {
        if std::fs::remove_file(path).is_err() {
            corrupt = true;
        }
    }

    let status = if corrupt { ReplicaStatus::Corrupt } else { ReplicaStatus::NotFound };
    Ok(Replica { worker: config.worker_name.clone(), database: database.to_string(), chunk, status, verify_time: Timestamp::now(), files: Vec::new() })
}

/// **Replicate** (spec.md §4.3): pulls every expected file for
/// `(database, chunk)` from `source` into temporary files, then renames
/// all of them into place in one pass. Restartable from scratch on
/// retry — no partial output is ever exposed under the canonical names.
pub fn replicate_replica(
    config: &WorkerConfig,
    source: &mut dyn PeerFileSource,
    database: &str,
    chunk: u32,
    cancel: &AtomicBool,
) -> Result<Replica, WorkerError> {
    let expected = config.expected_files(database, chunk).ok_or_else(|| WorkerError::UnknownDatabase(database.to_string()))?;
    let dir = config.chunk_dir(database);
    crate::config::ensure_dir(&dir).map_err(io_err(dir.display().to_string()))?;
    crate::config::ensure_dir(&config.scratch_dir).map_err(io_err(config.scratch_dir.display().to_string()))?;

    let mut staged: Vec<(String, std::path::PathBuf, FileInfo)> = Vec::new();

    let result = (|| -> Result<(), WorkerError> {
        for name in &expected {
            if cancel.load(Ordering::Relaxed) {
                return Err(WorkerError::Cancelled);
            }
            let tmp_path = config.scratch_path(&format!("{name}.{}.tmp", uuid::Uuid::new_v4()));
            let begin = Timestamp::now();
            let mut reader = source.open(database, chunk, name)?;
            let mut out = std::fs::File::create(&tmp_path).map_err(io_err(tmp_path.display().to_string()))?;
            let mut checksum = ResumableChecksum::new();
            let mut buf = [0u8; 64 * 1024];
            let mut size = 0u64;
            loop {
                if cancel.load(Ordering::Relaxed) {
                    return Err(WorkerError::Cancelled);
                }
                let n = reader.read(&mut buf).map_err(io_err(name.clone()))?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n]).map_err(io_err(tmp_path.display().to_string()))?;
                checksum.update(&buf[..n]);
                size += n as u64;
            }
            let end = Timestamp::now();
            let mut info = FileInfo::new(name.clone(), size, end, checksum.finalize());
            info.begin_transfer_time = begin;
            info.end_transfer_time = end;
            info.in_size = size;
            staged.push((name.clone(), tmp_path, info));
        }
        Ok(())
    })();

    if let Err(e) = result {
        for (_, tmp_path, _) in &staged {
            let _ = std::fs::remove_file(tmp_path);
        }
        return Err(e);
    }

    // Final rename pass, best-effort atomic per file.
    for (name, tmp_path, _) in &staged {
        let canonical = dir.join(name);
        if let Err(e) = std::fs::rename(tmp_path, &canonical) {
            for (_, other_tmp, _) in &staged {
                let _ = std::fs::remove_file(other_tmp);
            }
            return Err(io_err(canonical.display().to_string())(e));
        }
    }

    let files = staged.into_iter().map(|(_, _, info)| info).collect();
    Ok(Replica { worker: config.worker_name.clone(), database: database.to_string(), chunk, status: ReplicaStatus::Complete, verify_time: Timestamp::now(), files })
}

/// **Echo** (spec.md §4.2/§4.3): replies with `data` after sleeping
/// `delay_ms`. Included in this crate because, unlike every other
/// operation, Echo has no controller-side effect beyond round-tripping a
/// worker-observed delay — it exercises the same queue/execute path as
/// the data-moving operations.
pub fn echo(data: &str, delay_ms: u64, cancel: &AtomicBool) -> Result<String, WorkerError> {
    let mut remaining = Duration::from_millis(delay_ms);
    let step = Duration::from_millis(20);
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::Relaxed) {
            return Err(WorkerError::Cancelled);
        }
        let sleep_for = step.min(remaining);
        std::thread::sleep(sleep_for);
        remaining = remaining.saturating_sub(sleep_for);
    }
    Ok(data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn test_config(root: &std::path::Path) -> WorkerConfig {
        WorkerConfig::new("w1", "127.0.0.1:0".parse::<SocketAddr>().unwrap(), root.join("replicas"), root.join("scratch")).with_table("db", "Object")
    }

    #[test]
    fn find_reports_complete_when_all_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(config.chunk_dir("db")).unwrap();
        for ext in ["MYD", "MYI", "frm"] {
            std::fs::write(config.chunk_dir("db").join(format!("Object_1.{ext}")), b"x").unwrap();
        }
        let replica = find_replica(&config, "db", 1, true).unwrap();
        assert_eq!(replica.status, ReplicaStatus::Complete);
        assert_eq!(replica.files.len(), 3);
        assert!(replica.files.iter().all(|f| !f.cs.is_empty()));
    }

    #[test]
    fn find_reports_not_found_when_no_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let replica = find_replica(&config, "db", 99, false).unwrap();
        assert_eq!(replica.status, ReplicaStatus::NotFound);
    }

    #[test]
    fn find_reports_incomplete_when_some_files_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(config.chunk_dir("db")).unwrap();
        std::fs::write(config.chunk_dir("db").join("Object_1.MYD"), b"x").unwrap();
        let replica = find_replica(&config, "db", 1, false).unwrap();
        assert_eq!(replica.status, ReplicaStatus::Incomplete);
    }

    #[test]
    fn delete_removes_all_expected_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(config.chunk_dir("db")).unwrap();
        for ext in ["MYD", "MYI", "frm"] {
            std::fs::write(config.chunk_dir("db").join(format!("Object_1.{ext}")), b"x").unwrap();
        }
        let replica = delete_replica(&config, "db", 1).unwrap();
        assert_eq!(replica.status, ReplicaStatus::NotFound);
        assert_eq!(std::fs::read_dir(config.chunk_dir("db")).unwrap().count(), 0);
    }

    struct FakePeer {
        contents: std::collections::HashMap<String, Vec<u8>>,
    }

    impl PeerFileSource for FakePeer {
        fn open(&mut self, _database: &str, _chunk: u32, file_name: &str) -> Result<Box<dyn Read>, WorkerError> {
            let bytes = self.contents.get(file_name).cloned().unwrap_or_default();
            Ok(Box::new(std::io::Cursor::new(bytes)))
        }
    }

    #[test]
    fn replicate_pulls_every_expected_file_and_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut peer = FakePeer { contents: std::collections::HashMap::new() };
        for ext in ["MYD", "MYI", "frm"] {
            peer.contents.insert(format!("Object_1.{ext}"), b"payload".to_vec());
        }
        let cancel = AtomicBool::new(false);
        let replica = replicate_replica(&config, &mut peer, "db", 1, &cancel).unwrap();
        assert_eq!(replica.status, ReplicaStatus::Complete);
        assert_eq!(replica.files.len(), 3);
        for f in &replica.files {
            assert!(config.chunk_dir("db").join(&f.name).exists());
        }
        // Scratch dir must be empty: every temp file was renamed away.
        assert_eq!(std::fs::read_dir(&config.scratch_dir).unwrap().count(), 0);
    }

    #[test]
    fn replicate_cleans_up_temp_files_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut peer = FakePeer { contents: std::collections::HashMap::new() };
        let cancel = AtomicBool::new(true);
        let result = replicate_replica(&config, &mut peer, "db", 1, &cancel);
        assert!(matches!(result, Err(WorkerError::Cancelled)));
        assert!(!config.chunk_dir("db").join("Object_1.MYD").exists());
    }
}
