//! Execution engine reached over HTTP.
//!
//! Talks to an engine runner using the JSON protocol from
//! `infergate_common::protocol`. Also serves as a [`ResourceProbe`] for the
//! backends the runner reports load for.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use infergate_common::{
    Backend, BackendLoad, BackendLoadReport, EngineErrorBody, EngineErrorKind, ExecuteBatchRequest,
    ExecuteBatchResponse, LoadModelRequest, ModelDescriptor, Output, Payload, UnloadModelRequest,
};

use super::{EngineError, EngineHealth, ExecutionEngine};
use crate::monitor::ResourceProbe;

/// Engine runner client.
pub struct HttpEngine {
    base_url: String,
    http_client: Client,
}

impl HttpEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body, turning non-success statuses into `EngineError`s.
    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Response, EngineError> {
        let response = self
            .http_client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        Self::check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let response = self
            .http_client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("Undecodable response from {}: {}", path, e)))
    }

    async fn check_status(response: Response) -> Result<Response, EngineError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Self::map_error(status, &body))
    }

    /// Translate a non-success response into an `EngineError`.
    fn map_error(status: StatusCode, body: &str) -> EngineError {
        if let Ok(parsed) = serde_json::from_str::<EngineErrorBody>(body) {
            let detail = parsed.error;
            return match detail.kind {
                EngineErrorKind::PartialFailure if !detail.failed_indices.is_empty() => {
                    EngineError::Partial {
                        failed: detail.failed_indices,
                        message: detail.message,
                    }
                }
                EngineErrorKind::PartialFailure | EngineErrorKind::BatchFailed => {
                    EngineError::Batch(detail.message)
                }
                EngineErrorKind::ResourceExhausted => EngineError::ResourceExhausted(detail.message),
                EngineErrorKind::LoadFailed => EngineError::LoadFailed(detail.message),
            };
        }

        match status {
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::INSUFFICIENT_STORAGE => {
                EngineError::ResourceExhausted(format!("HTTP {}: {}", status, body))
            }
            _ => EngineError::Batch(format!("HTTP {}: {}", status, body)),
        }
    }
}

#[async_trait]
impl ExecutionEngine for HttpEngine {
    fn engine_type(&self) -> &'static str {
        "http"
    }

    async fn health_check(&self) -> Result<EngineHealth, EngineError> {
        let response = self
            .http_client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(EngineHealth {
                is_healthy: false,
                version: None,
                models_loaded: vec![],
            });
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))
    }

    async fn load_model(&self, descriptor: &ModelDescriptor) -> Result<(), EngineError> {
        let request = LoadModelRequest {
            model_id: descriptor.model_id.clone(),
            memory_footprint: descriptor.memory_footprint,
            backends: descriptor.backend_compatibility.clone(),
        };
        self.post("/v1/models/load", &request).await?;
        Ok(())
    }

    async fn unload_model(&self, model_id: &str) -> Result<(), EngineError> {
        let request = UnloadModelRequest {
            model_id: model_id.to_string(),
        };
        self.post("/v1/models/unload", &request).await?;
        Ok(())
    }

    async fn execute(
        &self,
        model_id: &str,
        backend: Backend,
        payloads: &[Payload],
    ) -> Result<Vec<Output>, EngineError> {
        let request = ExecuteBatchRequest {
            model_id: model_id.to_string(),
            backend,
            payloads: payloads.to_vec(),
        };
        let response: ExecuteBatchResponse = self
            .post("/v1/execute", &request)
            .await?
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("Undecodable execute response: {}", e)))?;
        Ok(response.outputs)
    }
}

#[async_trait]
impl ResourceProbe for HttpEngine {
    fn name(&self) -> &'static str {
        "engine"
    }

    async fn sample(&self, backend: Backend) -> Result<BackendLoad, EngineError> {
        let report: BackendLoadReport = self
            .get_json(&format!("/v1/backends/{}/load", backend))
            .await?;
        Ok(report.into())
    }
}
