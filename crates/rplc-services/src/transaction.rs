use serde::{Deserialize, Serialize};

use rplc_types::{ContributionId, Timestamp, TransactionId};

use crate::error::ServicesError;

/// Transaction state, per spec.md §3/§4.7. `Finished` and `Aborted` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    IsStarting,
    Started,
    IsFinishing,
    IsAborting,
    Finished,
    Aborted,
    StartFailed,
    FinishFailed,
    AbortFailed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Finished | TransactionState::Aborted)
    }

    /// The legal-transition table from spec.md §4.7, verbatim.
    pub fn can_transition_to(self, to: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, to),
            (IsStarting, Started)
                | (IsStarting, StartFailed)
                | (Started, IsFinishing)
                | (Started, IsAborting)
                | (IsFinishing, Finished)
                | (IsFinishing, FinishFailed)
                | (IsFinishing, IsAborting)
                | (IsAborting, Aborted)
                | (IsAborting, AbortFailed)
                | (StartFailed, IsAborting)
                | (FinishFailed, IsAborting)
                | (AbortFailed, IsAborting)
        )
    }
}

/// One entry in a transaction's append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub state: TransactionState,
    pub name: String,
    pub time: Timestamp,
    pub data: Option<serde_json::Value>,
}

/// A super-transaction, the unit under which contributions are loaded
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub database: String,
    pub state: TransactionState,
    pub begin_time: Timestamp,
    pub start_time: Timestamp,
    pub transition_time: Timestamp,
    pub end_time: Timestamp,
    pub context: Option<serde_json::Value>,
    pub log: Vec<TransactionLogEntry>,
}

impl Transaction {
    pub fn new(id: TransactionId, database: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id,
            database: database.into(),
            state: TransactionState::IsStarting,
            begin_time: now,
            start_time: Timestamp::UNSET,
            transition_time: now,
            end_time: Timestamp::UNSET,
            context: None,
            log: Vec::new(),
        }
    }

    /// Applies a validated state transition, recording it to the log and
    /// stamping the relevant timestamp. Returns
    /// [`ServicesError::IllegalTransactionTransition`] if the transition
    /// is not legal per spec.md §4.7 (the `stateTransitionIsAllowed`
    /// testable property in spec.md §8).
    pub fn transition(&mut self, to: TransactionState, now: Timestamp) -> Result<(), ServicesError> {
        if !self.state.can_transition_to(to) {
            return Err(ServicesError::IllegalTransactionTransition { from: self.state, to });
        }
        self.log.push(TransactionLogEntry {
            state: to,
            name: "transition".to_string(),
            time: now,
            data: None,
        });
        self.state = to;
        self.transition_time = now;
        match to {
            TransactionState::Started => self.start_time = now,
            TransactionState::Finished | TransactionState::Aborted => self.end_time = now,
            _ => {}
        }
        Ok(())
    }
}

/// Terminal contribution status (spec.md §4.7's FSA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContributionStatus {
    InProgress,
    Finished,
    CreateFailed,
    StartFailed,
    ReadFailed,
    LoadFailed,
    Cancelled,
}

impl ContributionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ContributionStatus::InProgress)
    }
}

/// The stage-specific failure reported by one of the four sequenced
/// contribution methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContributionFailure {
    Create,
    Start,
    Read,
    Load,
}

impl ContributionFailure {
    fn status(self) -> ContributionStatus {
        match self {
            ContributionFailure::Create => ContributionStatus::CreateFailed,
            ContributionFailure::Start => ContributionStatus::StartFailed,
            ContributionFailure::Read => ContributionStatus::ReadFailed,
            ContributionFailure::Load => ContributionStatus::LoadFailed,
        }
    }
}

/// A single file's worth of rows loaded into one `(table, chunk[,
/// overlap])` under a super-transaction (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub id: ContributionId,
    pub transaction_id: TransactionId,
    pub worker: String,
    pub database: String,
    pub table: String,
    pub chunk: Option<u32>,
    pub is_overlap: bool,
    pub url: String,
    pub is_async: bool,
    pub charset: String,
    pub status: ContributionStatus,
    pub create_time: Timestamp,
    pub start_time: Timestamp,
    pub read_time: Timestamp,
    pub load_time: Timestamp,
    pub num_bytes: u64,
    pub num_rows: u64,
    pub num_rows_loaded: u64,
    pub num_warnings: u32,
    pub http_error: Option<u32>,
    pub system_error: Option<i32>,
    pub error: Option<String>,
    pub retry_allowed: bool,
    pub tmp_file: Option<String>,
}

impl Contribution {
    /// `createdTransactionContrib`: the contribution row is created as
    /// soon as the ingest connection accepts a handshake.
    pub fn created(
        id: ContributionId,
        transaction_id: TransactionId,
        worker: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
        chunk: Option<u32>,
        is_overlap: bool,
        url: impl Into<String>,
        charset: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            transaction_id,
            worker: worker.into(),
            database: database.into(),
            table: table.into(),
            chunk,
            is_overlap,
            url: url.into(),
            is_async: false,
            charset: charset.into(),
            status: ContributionStatus::InProgress,
            create_time: now,
            start_time: Timestamp::UNSET,
            read_time: Timestamp::UNSET,
            load_time: Timestamp::UNSET,
            num_bytes: 0,
            num_rows: 0,
            num_rows_loaded: 0,
            num_warnings: 0,
            http_error: None,
            system_error: None,
            error: None,
            retry_allowed: true,
            tmp_file: None,
        }
    }

    /// `startedTransactionContrib`: the temporary output file has been
    /// opened and the worker is ready to read data packets.
    pub fn started(&mut self, tmp_file: impl Into<String>, now: Timestamp) {
        self.start_time = now;
        self.tmp_file = Some(tmp_file.into());
    }

    /// `readTransactionContrib`: one or more data packets have been
    /// parsed and appended to the temp file.
    pub fn read(&mut self, num_bytes: u64, num_rows: u64, now: Timestamp) {
        self.num_bytes += num_bytes;
        self.num_rows += num_rows;
        self.read_time = now;
    }

    /// `loadedTransactionContrib`: `loadDataIntoTable` has completed
    /// successfully. Per spec.md §3's invariant, `retryAllowed` becomes
    /// `false` once the irreversible load has begun, so it is cleared
    /// here regardless of the load's own outcome.
    pub fn loaded(&mut self, num_rows_loaded: u64, num_warnings: u32, now: Timestamp) {
        self.status = ContributionStatus::Finished;
        self.num_rows_loaded = num_rows_loaded;
        self.num_warnings = num_warnings;
        self.load_time = now;
        self.retry_allowed = false;
    }

    /// Records a stage-specific failure. `retry_allowed` is forced to
    /// `false` for `Load` failures (the write may have partially landed)
    /// and preserved by the caller otherwise.
    pub fn failed(
        &mut self,
        stage: ContributionFailure,
        http_error: Option<u32>,
        system_error: Option<i32>,
        error: impl Into<String>,
        retry_allowed: bool,
        now: Timestamp,
    ) {
        self.status = stage.status();
        self.http_error = http_error;
        self.system_error = system_error;
        self.error = Some(error.into());
        self.retry_allowed = retry_allowed && stage != ContributionFailure::Load;
        match stage {
            ContributionFailure::Create => self.create_time = now,
            ContributionFailure::Start => self.start_time = now,
            ContributionFailure::Read => self.read_time = now,
            ContributionFailure::Load => self.load_time = now,
        }
    }

    /// spec.md §8's contribution-monotonicity testable property:
    /// `createTime <= startTime <= readTime <= loadTime` whenever each is
    /// non-zero.
    pub fn timestamps_are_monotonic(&self) -> bool {
        let stamps = [self.create_time, self.start_time, self.read_time, self.load_time];
        let set: Vec<Timestamp> = stamps.into_iter().filter(|t| t.is_set()).collect();
        set.windows(2).all(|w| w[0] <= w[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_succeed() {
        let mut txn = Transaction::new(TransactionId::new(1), "db", Timestamp::from_millis(1));
        txn.transition(TransactionState::Started, Timestamp::from_millis(2)).unwrap();
        txn.transition(TransactionState::IsFinishing, Timestamp::from_millis(3)).unwrap();
        txn.transition(TransactionState::Finished, Timestamp::from_millis(4)).unwrap();
        assert_eq!(txn.state, TransactionState::Finished);
        assert!(txn.state.is_terminal());
    }

    #[test]
    fn illegal_transition_after_finished_is_rejected() {
        let mut txn = Transaction::new(TransactionId::new(1), "db", Timestamp::from_millis(1));
        txn.transition(TransactionState::Started, Timestamp::from_millis(2)).unwrap();
        txn.transition(TransactionState::IsFinishing, Timestamp::from_millis(3)).unwrap();
        txn.transition(TransactionState::Finished, Timestamp::from_millis(4)).unwrap();
        let err = txn.transition(TransactionState::Started, Timestamp::from_millis(5));
        assert!(err.is_err());
    }

    #[test]
    fn failed_states_can_only_escape_via_aborting() {
        let mut txn = Transaction::new(TransactionId::new(2), "db", Timestamp::from_millis(1));
        txn.transition(TransactionState::StartFailed, Timestamp::from_millis(2)).unwrap();
        assert!(txn.transition(TransactionState::Started, Timestamp::from_millis(3)).is_err());
        txn.transition(TransactionState::IsAborting, Timestamp::from_millis(3)).unwrap();
        txn.transition(TransactionState::Aborted, Timestamp::from_millis(4)).unwrap();
    }

    #[test]
    fn contribution_happy_path_disallows_retry_after_load() {
        let mut c = Contribution::created(
            ContributionId::new(1),
            TransactionId::new(1),
            "w1",
            "db",
            "Object",
            Some(4),
            false,
            "file:///tmp/x.csv",
            "utf8",
            Timestamp::from_millis(1),
        );
        c.started("/tmp/x.tmp", Timestamp::from_millis(2));
        c.read(100, 3, Timestamp::from_millis(3));
        c.loaded(3, 0, Timestamp::from_millis(4));
        assert_eq!(c.status, ContributionStatus::Finished);
        assert_eq!(c.num_rows, 3);
        assert!(!c.retry_allowed);
        assert!(c.timestamps_are_monotonic());
    }

    #[test]
    fn load_failure_forces_retry_not_allowed() {
        let mut c = Contribution::created(
            ContributionId::new(2),
            TransactionId::new(1),
            "w1",
            "db",
            "Object",
            None,
            false,
            "file:///tmp/x.csv",
            "utf8",
            Timestamp::from_millis(1),
        );
        c.failed(ContributionFailure::Load, None, None, "disk full", true, Timestamp::from_millis(5));
        assert!(!c.retry_allowed);
        assert_eq!(c.status, ContributionStatus::LoadFailed);
    }
}
