use thiserror::Error;

use crate::error::FailureKind;

/// Errors talking to the object store that holds the published archives.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage URL {0:?}")]
    InvalidBaseUrl(String),

    #[error("Object store unreachable during {op} of {name}: {source}")]
    Unreachable {
        op: &'static str,
        name: String,
        source: reqwest::Error,
    },

    #[error("HTTP error {status} during {op} of {name}: {body}")]
    HttpStatus {
        op: &'static str,
        name: String,
        status: u16,
        body: String,
    },

    #[error("Timed out after {secs}s during {op} of {name}")]
    Timeout {
        op: &'static str,
        name: String,
        secs: u64,
    },

    #[error("Unexpected object listing response for {name}: {source}")]
    Decode {
        name: String,
        source: serde_json::Error,
    },
}

impl StorageError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Artifact
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            StorageError::Unreachable { .. } | StorageError::Timeout { .. } => true,
            StorageError::InvalidBaseUrl(_) | StorageError::Decode { .. } => false,
        }
    }
}
