//! Execution engine abstraction layer.
//!
//! The numeric model-execution engine is an external collaborator. This module
//! defines the `ExecutionEngine` trait the scheduler drives, plus the errors an
//! engine may report.

mod http;

pub use http::HttpEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use infergate_common::{Backend, ModelDescriptor, Output, Payload};

/// Errors reported by an execution engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The whole batch failed with no per-item information.
    #[error("Batch failed: {0}")]
    Batch(String),

    /// Only the listed payload indices failed.
    #[error("Partial failure at indices {failed:?}: {message}")]
    Partial { failed: Vec<usize>, message: String },

    /// The backend ran out of memory or capacity.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    /// The engine broke its contract (e.g. output length mismatch).
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Engine communication error: {0}")]
    Transport(String),
}

/// Health status of an execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub is_healthy: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub models_loaded: Vec<String>,
}

/// Primary trait for execution engines.
///
/// `execute` receives payloads in batch order and must return outputs with the
/// same length and index correspondence. A failure affecting only some items is
/// reported as [`EngineError::Partial`], never as a shorter output list.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Unique identifier for this engine type (e.g. "http").
    fn engine_type(&self) -> &'static str;

    /// Check if the engine is available and responding.
    async fn health_check(&self) -> Result<EngineHealth, EngineError>;

    /// Load a model's artifacts into memory. May take seconds.
    async fn load_model(&self, descriptor: &ModelDescriptor) -> Result<(), EngineError>;

    /// Release a model's memory.
    async fn unload_model(&self, model_id: &str) -> Result<(), EngineError>;

    /// Run one batched call.
    async fn execute(
        &self,
        model_id: &str,
        backend: Backend,
        payloads: &[Payload],
    ) -> Result<Vec<Output>, EngineError>;
}
