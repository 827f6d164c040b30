use thiserror::Error;

use crate::error::FailureKind;

/// Errors fetching or parsing the listing feed. Any of these is fatal to a
/// sync run since there is nothing to reconcile against.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        source: reqwest::Error,
    },

    #[error("HTTP error {status} fetching feed {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Timed out after {secs}s fetching feed {url}")]
    Timeout { url: String, secs: u64 },

    #[error("Malformed feed: {0}")]
    Parse(String),
}

impl FeedError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FeedError::Parse(_) => FailureKind::Parse,
            _ => FailureKind::Transport,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            FeedError::Unreachable { .. } | FeedError::Timeout { .. } => true,
            FeedError::Parse(_) => false,
        }
    }
}
