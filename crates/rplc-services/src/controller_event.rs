use serde::{Deserialize, Serialize};

use rplc_types::{ControllerId, JobId, RequestId, Timestamp};

/// One row of the `controller_event` log (spec.md §6's persistent state
/// layout). Jobs append one of these on every state transition (spec.md
/// §4.4's ambient logging addition in `SPEC_FULL.md`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerEvent {
    pub id: u64,
    pub controller_id: ControllerId,
    pub timestamp: Timestamp,
    pub task: String,
    pub operation: String,
    pub status: String,
    pub request_id: Option<RequestId>,
    pub job_id: Option<JobId>,
    pub kv: Vec<(String, String)>,
}
