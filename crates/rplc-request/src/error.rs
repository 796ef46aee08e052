use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request {0} has already reached a terminal state")]
    AlreadyFinished(rplc_types::RequestId),
    #[error("worker reply carried no response body for a successful send")]
    MissingResponse,
    #[error(transparent)]
    Messenger(#[from] rplc_messenger::MessengerError),
    #[error(transparent)]
    Services(#[from] rplc_services::ServicesError),
}
