//! Degradation decisions produced by the fallback manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Backend;

/// Degradation path, listed in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    SmallerModel,
    AlternateBackend,
    QueueWithEta,
    TerminalError,
}

impl std::fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FallbackStrategy::SmallerModel => "smaller_model",
            FallbackStrategy::AlternateBackend => "alternate_backend",
            FallbackStrategy::QueueWithEta => "queue_with_eta",
            FallbackStrategy::TerminalError => "terminal_error",
        };
        write!(f, "{}", s)
    }
}

/// Where a degraded request is sent next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FallbackTarget {
    Model(String),
    Backend(Backend),
}

/// A single decision, created on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackDecision {
    pub strategy: FallbackStrategy,
    #[serde(default)]
    pub target: Option<FallbackTarget>,
    /// Expected relative quality, 1.0 meaning no degradation.
    pub degradation_factor: f64,
    #[serde(default)]
    pub eta_ms: Option<u64>,
}

impl FallbackDecision {
    pub fn smaller_model(variant: impl Into<String>, degradation_factor: f64) -> Self {
        Self {
            strategy: FallbackStrategy::SmallerModel,
            target: Some(FallbackTarget::Model(variant.into())),
            degradation_factor,
            eta_ms: None,
        }
    }

    pub fn alternate_backend(backend: Backend) -> Self {
        Self {
            strategy: FallbackStrategy::AlternateBackend,
            target: Some(FallbackTarget::Backend(backend)),
            degradation_factor: 1.0,
            eta_ms: None,
        }
    }

    pub fn queue_with_eta(eta: Duration) -> Self {
        Self {
            strategy: FallbackStrategy::QueueWithEta,
            target: None,
            degradation_factor: 1.0,
            eta_ms: Some(eta.as_millis() as u64),
        }
    }

    pub fn terminal() -> Self {
        Self {
            strategy: FallbackStrategy::TerminalError,
            target: None,
            degradation_factor: 0.0,
            eta_ms: None,
        }
    }

    pub fn eta(&self) -> Option<Duration> {
        self.eta_ms.map(Duration::from_millis)
    }

    pub fn is_terminal(&self) -> bool {
        self.strategy == FallbackStrategy::TerminalError
    }
}
