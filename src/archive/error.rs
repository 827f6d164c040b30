use thiserror::Error;

use crate::error::FailureKind;

/// Typed image download errors enabling retry classification.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("HTTP error downloading {url} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_written: u64,
    },

    #[error("Timed out after {secs}s downloading {url}")]
    Timeout { url: String, secs: u64 },
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DownloadError::Http { .. } | DownloadError::Timeout { .. } => true,
            DownloadError::Disk(_) => false,
        }
    }
}

/// Errors packaging a vehicle's images into an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("None of the {attempted} images for {label} could be downloaded")]
    NoImages { label: String, attempted: usize },

    #[error("Scratch directory error: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("Packaging {label} failed: {source}")]
    Zip {
        label: String,
        source: zip::result::ZipError,
    },

    #[error("Packaging task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ArchiveError {
    pub fn kind(&self) -> FailureKind {
        match self {
            // Every image was unreachable.
            ArchiveError::NoImages { .. } => FailureKind::Transport,
            _ => FailureKind::Artifact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_404_not_retryable() {
        let e = DownloadError::HttpStatus {
            status: 404,
            url: "x".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_http_429_retryable() {
        let e = DownloadError::HttpStatus {
            status: 429,
            url: "x".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn test_http_503_retryable() {
        let e = DownloadError::HttpStatus {
            status: 503,
            url: "x".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn test_disk_not_retryable() {
        let e = DownloadError::Disk(std::io::Error::other("disk full"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_timeout_retryable() {
        let e = DownloadError::Timeout {
            url: "x".into(),
            secs: 30,
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn test_http_connection_error_retryable() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(reqwest::Client::new().get("http://127.0.0.1:1").send())
            .unwrap_err();
        let e = DownloadError::Http {
            source: err,
            url: "x".into(),
            bytes_written: 0,
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn test_archive_error_kind() {
        let e = ArchiveError::NoImages {
            label: "Model_A".into(),
            attempted: 3,
        };
        assert_eq!(e.kind(), FailureKind::Transport);
        assert!(e.to_string().contains("Model_A"));

        let e = ArchiveError::Scratch(std::io::Error::other("disk full"));
        assert_eq!(e.kind(), FailureKind::Artifact);
    }
}
