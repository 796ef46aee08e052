use std::fmt::{self, Display};

/// Primary lifecycle state of a client-side [`crate::Request`] (spec.md
/// §4.2). A request never moves out of `Finished` (spec.md §3's
/// invariant).
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

/// Extended state, set once on entering [`PrimaryState::Finished`]
/// (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtendedState {
    #[default]
    None,
    Success,
    ClientError,
    ServerCreated,
    ServerQueued,
    ServerInProgress,
    ServerIsCancelling,
    ServerBad,
    ServerError,
    ServerCancelled,
    TimeoutExpired,
    Cancelled,
    ConfigError,
}

impl ExtendedState {
    /// Whether this extended state is reachable while the request is still
    /// `InProgress` and keep-tracking is in effect (spec.md §4.2's
    /// `analyze` give-up states for `CREATED`/`QUEUED`/`IN_PROGRESS`/
    /// `IS_CANCELLING`).
    pub fn is_give_up_state(self) -> bool {
        matches!(
            self,
            ExtendedState::ServerCreated
                | ExtendedState::ServerQueued
                | ExtendedState::ServerInProgress
                | ExtendedState::ServerIsCancelling
        )
    }
}

impl Display for ExtendedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtendedState::None => "NONE",
            ExtendedState::Success => "SUCCESS",
            ExtendedState::ClientError => "CLIENT_ERROR",
            ExtendedState::ServerCreated => "SERVER_CREATED",
            ExtendedState::ServerQueued => "SERVER_QUEUED",
            ExtendedState::ServerInProgress => "SERVER_IN_PROGRESS",
            ExtendedState::ServerIsCancelling => "SERVER_IS_CANCELLING",
            ExtendedState::ServerBad => "SERVER_BAD",
            ExtendedState::ServerError => "SERVER_ERROR",
            ExtendedState::ServerCancelled => "SERVER_CANCELLED",
            ExtendedState::TimeoutExpired => "TIMEOUT_EXPIRED",
            ExtendedState::Cancelled => "CANCELLED",
            ExtendedState::ConfigError => "CONFIG_ERROR",
        };
        f.write_str(s)
    }
}
