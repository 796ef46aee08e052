use serde::{Deserialize, Serialize};

use rplc_types::{Replica, ServerPerformance, Timestamp};

/// Distinguishes a fresh operation request from a management message
/// referencing an existing one (spec.md §6 `RequestHeader.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Queued,
    Request,
}

/// The queued operation type, present when `RequestKind::Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuedType {
    ReplicaCreate,
    ReplicaDelete,
    ReplicaFind,
    ReplicaFindAll,
    TestEcho,
}

/// The management operation type, present when `RequestKind::Request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementType {
    Track,
    Stop,
    Dispose,
}

/// Envelope preceding every operation's type-specific body (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    pub id: String,
    pub kind: RequestKind,
    pub queued_type: Option<QueuedType>,
    pub management_type: Option<ManagementType>,
    pub priority: i32,
    /// Seconds; `0` means no expiration.
    pub timeout: u32,
    pub instance_id: String,
}

/// Type-specific request bodies (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestBody {
    Replicate {
        database: String,
        chunk: u32,
        worker_source: String,
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
        compute_cs: bool,
    },
    FindAll {
        database: String,
    },
    Echo {
        data: String,
        delay_ms: u64,
    },
    Track {
        target_id: String,
        target_queued_type: QueuedType,
    },
    Stop {
        target_id: String,
        target_queued_type: QueuedType,
    },
}

/// Status returned by a worker in response to an operation (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Created,
    Queued,
    InProgress,
    IsCancelling,
    Bad,
    Failed,
    Cancelled,
}

/// Extended status detail accompanying a [`ResponseStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatusExt {
    None,
    InvalidParam,
    FileIo,
    Duplicate,
}

/// The header and body travel as a single framed message on the wire
/// (spec.md §1 assumes "length-prefixed typed messages"; a frame carries
/// exactly one message, so header and body are serialized together rather
/// than as two back-to-back frames).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub header: RequestHeader,
    pub body: RequestBody,
}

/// The worker's reply to a request (spec.md §6 `Response<T>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub status: ResponseStatus,
    pub status_ext: ResponseStatusExt,
    pub performance: ServerPerformance,
    /// Present on tracking replies: the timing of the *target* request
    /// rather than of this `REQUEST_TRACK` message itself.
    pub target_performance: Option<ServerPerformance>,
    pub replica: Option<Replica>,
    pub replicas: Option<Vec<Replica>>,
    pub echo_data: Option<String>,
}

impl Response {
    /// `analyze`'s rule for picking performance counters: prefer
    /// `target_performance` over `performance` when present (spec.md
    /// §4.2).
    pub fn effective_performance(&self) -> ServerPerformance {
        self.target_performance.unwrap_or(self.performance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_performance_prefers_target() {
        let mut resp = Response {
            id: "1".into(),
            status: ResponseStatus::Success,
            status_ext: ResponseStatusExt::None,
            performance: ServerPerformance {
                receive_time: Timestamp::from_millis(1),
                ..Default::default()
            },
            target_performance: None,
            replica: None,
            replicas: None,
            echo_data: None,
        };
        assert_eq!(resp.effective_performance().receive_time, Timestamp::from_millis(1));

        resp.target_performance = Some(ServerPerformance {
            receive_time: Timestamp::from_millis(2),
            ..Default::default()
        });
        assert_eq!(resp.effective_performance().receive_time, Timestamp::from_millis(2));
    }
}
