//! Failure taxonomy shared by every component.
//!
//! Module-level errors (`FeedError`, `StoreError`, `StorageError`,
//! `ArchiveError`) each map onto one of these kinds so outcomes and log lines
//! can report failures uniformly.

use std::fmt;

/// Broad class of a failure, used as a structured log field and in per-vehicle
/// outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Feed or image unreachable, non-2xx response, timeout.
    Transport,
    /// Feed body not well-formed.
    Parse,
    /// Persistent store read or write error.
    Persistence,
    /// Packaging, upload or object-store error.
    Artifact,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Parse => "parse",
            Self::Persistence => "persistence",
            Self::Artifact => "artifact",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure scoped to a single vehicle, kept in outcomes after logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}
