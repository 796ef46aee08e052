use serde::{Deserialize, Serialize};

/// A set of databases that share a chunking scheme and a target
/// replication level `R`.
///
/// A chunk is **colocated** on a worker iff every database in the family
/// has a replica of that chunk on that worker. A chunk replica is **good**
/// iff it is colocated on its worker AND every per-database replica
/// involved is [`crate::ReplicaStatus::Complete`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFamily {
    pub name: String,
    pub databases: Vec<String>,
    pub replication_level: u32,
}

impl DatabaseFamily {
    pub fn new(name: impl Into<String>, databases: Vec<String>, replication_level: u32) -> Self {
        Self {
            name: name.into(),
            databases,
            replication_level,
        }
    }

    pub fn contains_database(&self, database: &str) -> bool {
        self.databases.iter().any(|d| d == database)
    }

    /// Single-database families are trivially colocated: there is only
    /// one database whose presence to check, so "colocated" degenerates
    /// to "present" (scenario 1 in spec.md §8).
    pub fn is_single_database(&self) -> bool {
        self.databases.len() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_database_family_is_trivially_colocated() {
        let family = DatabaseFamily::new("f1", vec!["db".to_string()], 2);
        assert!(family.is_single_database());
        assert!(family.contains_database("db"));
        assert!(!family.contains_database("other"));
    }
}
