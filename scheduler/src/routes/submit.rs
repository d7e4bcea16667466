//! Request ingress: JSON in, scheduler result out.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use infergate_common::{Backend, Capability, FallbackDecision, Output, Payload, Priority};

use crate::error::Result;
use crate::request::InferenceRequest;
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub model: String,
    pub payload: Payload,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
    #[serde(default = "default_batchable")]
    pub batchable: bool,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

fn default_batchable() -> bool {
    true
}

impl SubmitRequest {
    pub fn into_request(self, default_max_wait: Duration) -> InferenceRequest {
        let max_wait = self
            .max_wait_ms
            .map(Duration::from_millis)
            .unwrap_or(default_max_wait);
        // Config keys are lowercased, so model ids are too.
        InferenceRequest::new(self.model.to_lowercase(), self.payload)
            .with_priority(self.priority)
            .with_max_wait(max_wait)
            .with_batchable(self.batchable)
            .with_capabilities(self.capabilities)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
    pub model: String,
    pub backend: Backend,
    pub output: Output,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<FallbackDecision>,
}

/// POST /v1/submit - schedule one request and wait for its result
async fn submit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>> {
    let request = body.into_request(state.scheduler.default_max_wait());
    let completion = state.scheduler.submit(request).await?;

    Ok(Json(SubmitResponse {
        id: completion.request_id,
        model: completion.model_id,
        backend: completion.backend,
        output: completion.output,
        degradations: completion.degradations,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/submit", post(submit))
        .with_state(state)
}
