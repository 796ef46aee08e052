use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::filename::ChunkFileName;
use crate::Timestamp;

/// Status of a replica as last observed by a worker.
///
/// A replica is [`ReplicaStatus::Complete`] iff all expected files for its
/// `(database, chunk)` are present and their recorded checksums match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    NotFound,
    Corrupt,
    Incomplete,
    Complete,
}

impl ReplicaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplicaStatus::NotFound => "NOT_FOUND",
            ReplicaStatus::Corrupt => "CORRUPT",
            ReplicaStatus::Incomplete => "INCOMPLETE",
            ReplicaStatus::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file on disk belonging to a replica.
///
/// `name` is the short on-disk file name; [`FileInfo::parsed`] derives the
/// base table, chunk, and the `is_overlap`/`is_data`/`is_index` flags from
/// it via [`ChunkFileName::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mtime: Timestamp,
    pub cs: String,
    pub begin_transfer_time: Timestamp,
    pub end_transfer_time: Timestamp,
    pub in_size: u64,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64, mtime: Timestamp, cs: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mtime,
            cs: cs.into(),
            begin_transfer_time: Timestamp::UNSET,
            end_transfer_time: Timestamp::UNSET,
            in_size: 0,
        }
    }

    /// Parses this file's name into its `(base_table, chunk, is_overlap,
    /// extension)` quadruple. Returns `None` for names that don't follow
    /// the chunk-file convention (spec.md §3's parse round-trip invariant
    /// only binds names that were produced by [`ChunkFileName::format`]).
    pub fn parsed(&self) -> Option<ChunkFileName> {
        ChunkFileName::parse(&self.name).ok()
    }

    pub fn is_overlap(&self) -> bool {
        self.parsed().is_some_and(|p| p.is_overlap)
    }

    pub fn is_data(&self) -> bool {
        self.parsed().is_some_and(|p| p.extension == crate::filename::Extension::Data)
    }

    pub fn is_index(&self) -> bool {
        self.parsed().is_some_and(|p| p.extension == crate::filename::Extension::Index)
    }

    pub fn base_table(&self) -> Option<String> {
        self.parsed().map(|p| p.base_table)
    }
}

/// Status of a single `(worker, database, chunk)` replica, as reported by
/// a worker's Find/FindAll/Replicate/Delete operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub worker: String,
    pub database: String,
    pub chunk: u32,
    pub status: ReplicaStatus,
    pub verify_time: Timestamp,
    pub files: Vec<FileInfo>,
}

impl Replica {
    pub fn not_found(worker: impl Into<String>, database: impl Into<String>, chunk: u32) -> Self {
        Self {
            worker: worker.into(),
            database: database.into(),
            chunk,
            status: ReplicaStatus::NotFound,
            verify_time: Timestamp::UNSET,
            files: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ReplicaStatus::Complete
    }

    /// Returns the files of this replica indexed by name, mirroring the
    /// original's `ReplicaInfo::fileInfoMap()`.
    pub fn file_info_map(&self) -> HashMap<&str, &FileInfo> {
        self.files.iter().map(|f| (f.name.as_str(), f)).collect()
    }

    /// Earliest `begin_transfer_time` among this replica's files, or
    /// [`Timestamp::UNSET`] if the replica carries no transfer timings
    /// (e.g. it was produced by Find rather than Replicate).
    pub fn begin_transfer_time(&self) -> Timestamp {
        self.files
            .iter()
            .map(|f| f.begin_transfer_time)
            .filter(|t| t.is_set())
            .min()
            .unwrap_or(Timestamp::UNSET)
    }

    /// Latest `end_transfer_time` among this replica's files.
    pub fn end_transfer_time(&self) -> Timestamp {
        self.files
            .iter()
            .map(|f| f.end_transfer_time)
            .max()
            .unwrap_or(Timestamp::UNSET)
    }
}

/// A transient collection of replicas, e.g. the result of a FindAll
/// operation against one worker/database pair.
pub type ReplicaCollection = Vec<Replica>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_replica_has_no_files() {
        let r = Replica::not_found("w1", "db", 4);
        assert_eq!(r.status, ReplicaStatus::NotFound);
        assert!(r.files.is_empty());
        assert!(!r.is_complete());
    }

    #[test]
    fn transfer_times_span_all_files() {
        let mut r = Replica::not_found("w1", "db", 4);
        r.status = ReplicaStatus::Complete;
        r.files.push({
            let mut f = FileInfo::new("Object_4.MYD", 10, Timestamp::from_millis(1), "abc");
            f.begin_transfer_time = Timestamp::from_millis(100);
            f.end_transfer_time = Timestamp::from_millis(150);
            f
        });
        r.files.push({
            let mut f = FileInfo::new("Object_4.MYI", 10, Timestamp::from_millis(1), "def");
            f.begin_transfer_time = Timestamp::from_millis(90);
            f.end_transfer_time = Timestamp::from_millis(200);
            f
        });
        assert_eq!(r.begin_transfer_time(), Timestamp::from_millis(90));
        assert_eq!(r.end_transfer_time(), Timestamp::from_millis(200));
    }

    #[test]
    fn file_info_map_is_keyed_by_name() {
        let mut r = Replica::not_found("w1", "db", 4);
        r.files.push(FileInfo::new("Object_4.MYD", 1, Timestamp::UNSET, ""));
        let map = r.file_info_map();
        assert!(map.contains_key("Object_4.MYD"));
    }
}
