use thiserror::Error;

/// Faults raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// An election filter failed for reasons other than ordinary business logic.
#[derive(Debug, Error)]
#[error("filter `{filter}` failed: {message}")]
pub struct FilterError {
    pub filter: String,
    pub message: String,
}

impl FilterError {
    pub fn new(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single create or state-change run (election + commit).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    Validation(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The awaited parent kept leaving its running state between election
    /// and insert.
    #[error("parent `{0}` kept changing state while its continuation was created")]
    UnsettledParent(String),
}

/// Errors surfaced by [`BackgroundJobClient`](crate::client::BackgroundJobClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected before touching storage.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("background job creation failed: {0}")]
    Creation(#[source] DispatchError),

    #[error("state change of a background job failed: {0}")]
    StateChange(#[source] DispatchError),

    #[error("reading background job data failed: {0}")]
    Read(#[source] StorageError),
}
