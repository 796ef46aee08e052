use rplc_types::Replica;
use rplc_wire::{ManagementType, QueuedType, RequestBody, RequestKind};

/// The seven operation types a [`crate::Request`] can drive (spec.md
/// §4.2's table). Modeled as a single tagged union rather than a class
/// hierarchy per spec.md §9's design note.
#[derive(Debug, Clone)]
pub enum Operation {
    Replicate {
        worker_source: String,
        database: String,
        chunk: u32,
        allow_duplicate: bool,
    },
    Delete {
        database: String,
        chunk: u32,
        allow_duplicate: bool,
    },
    Find {
        database: String,
        chunk: u32,
        compute_check_sum: bool,
    },
    FindAll {
        database: String,
        save_replica_info: bool,
    },
    Echo {
        data: String,
        delay_ms: u64,
    },
    StatusOf {
        target_id: rplc_types::RequestId,
        target_queued_type: QueuedType,
    },
    StopOf {
        target_id: rplc_types::RequestId,
        target_queued_type: QueuedType,
    },
}

impl Operation {
    pub fn queued_type(&self) -> Option<QueuedType> {
        match self {
            Operation::Replicate { .. } => Some(QueuedType::ReplicaCreate),
            Operation::Delete { .. } => Some(QueuedType::ReplicaDelete),
            Operation::Find { .. } => Some(QueuedType::ReplicaFind),
            Operation::FindAll { .. } => Some(QueuedType::ReplicaFindAll),
            Operation::Echo { .. } => Some(QueuedType::TestEcho),
            Operation::StatusOf { .. } | Operation::StopOf { .. } => None,
        }
    }

    pub fn wire_kind(&self) -> RequestKind {
        match self {
            Operation::StatusOf { .. } | Operation::StopOf { .. } => RequestKind::Request,
            _ => RequestKind::Queued,
        }
    }

    pub fn management_type(&self) -> Option<ManagementType> {
        match self {
            Operation::StatusOf { .. } => Some(ManagementType::Track),
            Operation::StopOf { .. } => Some(ManagementType::Stop),
            _ => None,
        }
    }

    /// Whether a finished request of this type gets its own row in the
    /// `request` log table (spec.md §4.2's "Persisted" column; tracking
    /// and stop messages reference an existing request instead of
    /// recording a new one).
    pub fn is_persisted(&self) -> bool {
        !matches!(self, Operation::StatusOf { .. } | Operation::StopOf { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Replicate { .. } => "REPLICATE",
            Operation::Delete { .. } => "DELETE",
            Operation::Find { .. } => "FIND",
            Operation::FindAll { .. } => "FIND_ALL",
            Operation::Echo { .. } => "ECHO",
            Operation::StatusOf { .. } => "STATUS_OF",
            Operation::StopOf { .. } => "STOP_OF",
        }
    }

    pub fn build_body(&self) -> RequestBody {
        match self {
            Operation::Replicate { worker_source, database, chunk, allow_duplicate } => RequestBody::Replicate {
                database: database.clone(),
                chunk: *chunk,
                worker_source: worker_source.clone(),
                allow_duplicate: *allow_duplicate,
            },
            Operation::Delete { database, chunk, allow_duplicate } => RequestBody::Delete {
                database: database.clone(),
                chunk: *chunk,
                allow_duplicate: *allow_duplicate,
            },
            Operation::Find { database, chunk, compute_check_sum } => RequestBody::Find {
                database: database.clone(),
                chunk: *chunk,
                compute_cs: *compute_check_sum,
            },
            Operation::FindAll { database, .. } => RequestBody::FindAll { database: database.clone() },
            Operation::Echo { data, delay_ms } => RequestBody::Echo { data: data.clone(), delay_ms: *delay_ms },
            Operation::StatusOf { target_id, target_queued_type } => RequestBody::Track {
                target_id: target_id.to_string(),
                target_queued_type: *target_queued_type,
            },
            Operation::StopOf { target_id, target_queued_type } => RequestBody::Stop {
                target_id: target_id.to_string(),
                target_queued_type: *target_queued_type,
            },
        }
    }
}

/// The successful payload of a finished request, keyed to its operation
/// type (spec.md §4.2's "Success result" column).
#[derive(Debug, Clone)]
pub enum RequestResult {
    Replica(Replica),
    Replicas(Vec<Replica>),
    Echo(String),
    TrackedStatus { status: rplc_wire::ResponseStatus },
    None,
}
