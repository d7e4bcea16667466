//! HTTP protocol types for scheduler-engine communication.
//!
//! The scheduler talks to an engine runner over JSON/HTTP:
//!
//! - `POST /v1/execute` with [`ExecuteBatchRequest`], answered by
//!   [`ExecuteBatchResponse`] on success or [`EngineErrorBody`] on failure
//! - `POST /v1/models/load` with [`LoadModelRequest`]
//! - `POST /v1/models/unload` with [`UnloadModelRequest`]
//! - `GET /v1/backends/{backend}/load` answered by [`BackendLoadReport`]
//!
//! Outputs of `/v1/execute` are index-aligned with the submitted payloads.
//! An engine that fails only some items must answer with
//! [`EngineErrorKind::PartialFailure`] and list the failed indices, never a
//! shorter `outputs` array.

use serde::{Deserialize, Serialize};

use crate::{Backend, BackendLoad, Output, Payload};

/// One batched execution call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteBatchRequest {
    pub model_id: String,
    pub backend: Backend,
    pub payloads: Vec<Payload>,
}

/// Successful execution, one output per submitted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteBatchResponse {
    pub outputs: Vec<Output>,
}

/// Structured error returned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineErrorBody {
    pub error: EngineErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineErrorDetail {
    pub kind: EngineErrorKind,
    pub message: String,
    /// Indices of payloads that failed (partial failures only).
    #[serde(default)]
    pub failed_indices: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    BatchFailed,
    PartialFailure,
    ResourceExhausted,
    LoadFailed,
}

/// Ask the engine to make a model resident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelRequest {
    pub model_id: String,
    pub memory_footprint: u64,
    pub backends: Vec<Backend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnloadModelRequest {
    pub model_id: String,
}

/// Load figures reported by the engine for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendLoadReport {
    pub backend: Backend,
    pub utilization: f64,
    #[serde(default)]
    pub memory_used: u64,
    #[serde(default)]
    pub memory_total: u64,
}

impl From<BackendLoadReport> for BackendLoad {
    fn from(report: BackendLoadReport) -> Self {
        BackendLoad::new(report.utilization, report.memory_used, report.memory_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_body() {
        let json = r#"{
            "error": {
                "kind": "partial_failure",
                "message": "payload 2 is not valid UTF-8 after normalization",
                "failed_indices": [2]
            }
        }"#;
        let body: EngineErrorBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.error.kind, EngineErrorKind::PartialFailure);
        assert_eq!(body.error.failed_indices, vec![2]);
    }

    #[test]
    fn test_failed_indices_default_empty() {
        let json = r#"{"error": {"kind": "batch_failed", "message": "boom"}}"#;
        let body: EngineErrorBody = serde_json::from_str(json).unwrap();
        assert!(body.error.failed_indices.is_empty());
    }

    #[test]
    fn test_execute_request_shape() {
        let request = ExecuteBatchRequest {
            model_id: "minilm".to_string(),
            backend: Backend::Accelerator,
            payloads: vec![Payload::embedding("a"), Payload::embedding("b")],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["backend"], "accelerator");
        assert_eq!(json["payloads"][1]["input"], "b");
    }

    #[test]
    fn test_load_report_into_backend_load() {
        let report = BackendLoadReport {
            backend: Backend::Accelerator,
            utilization: 0.42,
            memory_used: 1,
            memory_total: 4,
        };
        let load: BackendLoad = report.into();
        assert_eq!(load.utilization, 0.42);
        assert_eq!(load.memory_free(), 3);
    }
}
