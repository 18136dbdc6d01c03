use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Machine-distinguishable classification of every failure the client can
/// surface.
///
/// Each layer's error type maps onto one of these so that presentation
/// and retry decisions never have to inspect message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The request never produced an HTTP response (DNS, TLS, connect, timeout).
    Network,
    /// The remote answered with a non-success status.
    Rejected,
    /// The remote answered, but the body was not what the contract promises.
    MalformedResponse,
    /// The consumer stopped caring before the job finished.
    Cancelled,
    /// Too many consecutive status checks failed.
    Unreachable,
    /// The remote reported the job itself as failed.
    RemoteFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Rejected => "rejected",
            Self::MalformedResponse => "malformed-response",
            Self::Cancelled => "cancelled",
            Self::Unreachable => "unreachable",
            Self::RemoteFailure => "remote-failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure attached to a job that ended in `failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Job tracking was cancelled")
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
