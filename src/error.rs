use thiserror::Error;

/// Why a single URL failed to fetch. Carried inside a failed `FetchResult`,
/// never returned as an `Err` from the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out")]
    Timeout,
    #[error("disallowed by robots.txt")]
    RobotsDisallowed,
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("empty response body")]
    EmptyBody,
    #[error("engine error: {0}")]
    Engine(String),
    #[error("fetch task aborted before reporting")]
    Aborted,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}
