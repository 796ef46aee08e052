use std::fmt::{self, Display};

/// Primary lifecycle state of a Job (spec.md §4.4). Mirrors
/// [`rplc_request::PrimaryState`]: a Job never moves out of `Finished`.
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

/// Extended state, set once on entering [`PrimaryState::Finished`].
/// Spec.md §4.4/§4.4.1 names `SUCCESS`/`FAILED` explicitly (FindAllJob);
/// §4.4.5 names `CONFIG_ERROR` (MoveReplicaJob precondition failure); §5
/// names `CANCELLED` (Job cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtendedState {
    #[default]
    None,
    Success,
    Failed,
    ConfigError,
    Cancelled,
}

impl Display for ExtendedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtendedState::None => "NONE",
            ExtendedState::Success => "SUCCESS",
            ExtendedState::Failed => "FAILED",
            ExtendedState::ConfigError => "CONFIG_ERROR",
            ExtendedState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}
