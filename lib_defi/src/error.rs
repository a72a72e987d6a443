//! Errors surfaced by backend collaborators.
//!
//! None of these escape the fetch guard: a failed fetch is reported to the
//! notification sink and the section still settles at `Loaded`.

use thiserror::Error;

use crate::services::TaskId;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("backend rejected the query ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("task {0} failed: {1}")]
    Task(TaskId, String),

    #[error("task {0} is unknown to the backend")]
    TaskNotFound(TaskId),

    #[error("task {0} did not complete within {1:?}")]
    Timeout(TaskId, std::time::Duration),

    #[error("malformed backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[cfg(feature = "retrieve")]
    #[error("transport error: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    #[cfg(feature = "retrieve")]
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "retrieve")]
impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport(reqwest_middleware::Error::Reqwest(e))
    }
}
