use thiserror::Error;

use rplc_types::JobId;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} has already reached a terminal state")]
    AlreadyFinished(JobId),
    #[error("unknown worker {0:?}")]
    UnknownWorker(String),
    #[error("database family {0:?} does not contain database {1:?}")]
    UnknownDatabase(String, String),
    #[error(transparent)]
    Request(#[from] rplc_request::RequestError),
    #[error(transparent)]
    Messenger(#[from] rplc_messenger::MessengerError),
    #[error(transparent)]
    Services(#[from] rplc_services::ServicesError),
}
