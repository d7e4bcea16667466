//! Error taxonomy shared across the scheduler boundary.

use serde::{Deserialize, Serialize};

/// Kind of terminal error a request can resolve with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request, rejected before admission. Never retried.
    Validation,
    /// The request's max wait elapsed while pending, batched or queued.
    Timeout,
    /// No degradation path was available.
    ResourceExhausted,
    /// Engine-level failure, after the singleton retry.
    Execution,
    /// Invalid model descriptor or configuration. Fatal at startup.
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::ResourceExhausted => "resource_exhausted_error",
            ErrorKind::Execution => "execution_error",
            ErrorKind::Configuration => "configuration_error",
        }
    }

    /// Whether the scheduler may retry a request that failed with this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Execution)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
