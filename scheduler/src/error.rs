//! Error types for the scheduler.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use infergate_common::{ErrorKind, FallbackStrategy};

/// Structured error a request resolves with.
///
/// Carries the taxonomy kind, the degradation path attempted before giving up
/// (if any) and, when the scheduler could estimate one, a wait hint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SchedulerError {
    pub kind: ErrorKind,
    pub message: String,
    pub degradation: Option<FallbackStrategy>,
    pub eta: Option<Duration>,
}

impl SchedulerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            degradation: None,
            eta: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn with_degradation(mut self, strategy: Option<FallbackStrategy>) -> Self {
        self.degradation = strategy;
        self
    }

    pub fn with_eta(mut self, eta: Duration) -> Self {
        self.eta = Some(eta);
        self
    }
}

impl From<config::ConfigError> for SchedulerError {
    fn from(err: config::ConfigError) -> Self {
        SchedulerError::configuration(err.to_string())
    }
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Execution => StatusCode::BAD_GATEWAY,
            ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "type": self.kind.as_str(),
                "message": self.message,
                "degradation": self.degradation,
                "eta_ms": self.eta.map(|eta| eta.as_millis() as u64),
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let err = SchedulerError::timeout("waited 30000ms");
        assert_eq!(err.to_string(), "timeout_error: waited 30000ms");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (SchedulerError::validation("x"), StatusCode::BAD_REQUEST),
            (SchedulerError::timeout("x"), StatusCode::GATEWAY_TIMEOUT),
            (SchedulerError::resource_exhausted("x"), StatusCode::SERVICE_UNAVAILABLE),
            (SchedulerError::execution("x"), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_builders_attach_hints() {
        let err = SchedulerError::resource_exhausted("overloaded")
            .with_degradation(Some(FallbackStrategy::QueueWithEta))
            .with_eta(Duration::from_millis(250));
        assert_eq!(err.degradation, Some(FallbackStrategy::QueueWithEta));
        assert_eq!(err.eta, Some(Duration::from_millis(250)));
    }
}
