use std::fmt::{self, Display};

/// Primary lifecycle state of a worker-side [`crate::WorkerRequest`]
/// (spec.md §4.3 — mirrors the client-side `Request` primary states).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryState {
    Created,
    InProgress,
    Finished,
}

impl Display for PrimaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimaryState::Created => "CREATED",
            PrimaryState::InProgress => "IN_PROGRESS",
            PrimaryState::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}

/// Extended state mirroring the wire protocol statuses (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtendedState {
    #[default]
    Queued,
    InProgress,
    IsCancelling,
    Success,
    Bad,
    Failed,
    Cancelled,
}

impl From<ExtendedState> for rplc_wire::ResponseStatus {
    fn from(state: ExtendedState) -> Self {
        match state {
            ExtendedState::Queued => rplc_wire::ResponseStatus::Queued,
            ExtendedState::InProgress => rplc_wire::ResponseStatus::InProgress,
            ExtendedState::IsCancelling => rplc_wire::ResponseStatus::IsCancelling,
            ExtendedState::Success => rplc_wire::ResponseStatus::Success,
            ExtendedState::Bad => rplc_wire::ResponseStatus::Bad,
            ExtendedState::Failed => rplc_wire::ResponseStatus::Failed,
            ExtendedState::Cancelled => rplc_wire::ResponseStatus::Cancelled,
        }
    }
}
