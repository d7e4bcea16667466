//! Resource snapshot and residency diagnostics.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use infergate_common::ResourceSnapshot;

use crate::models::ResidentModelInfo;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub snapshot: ResourceSnapshot,
    pub resident_models: Vec<ResidentModelInfo>,
    pub resident_bytes: u64,
    pub memory_budget_bytes: u64,
    pub pending_requests: usize,
}

/// GET /v1/status - latest snapshot and resident set
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let scheduler = &state.scheduler;
    Json(StatusResponse {
        snapshot: scheduler.snapshot().as_ref().clone(),
        resident_models: scheduler.resident_models(),
        resident_bytes: scheduler.resident_bytes(),
        memory_budget_bytes: scheduler.memory_budget(),
        pending_requests: scheduler.pending_requests(),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .with_state(state)
}
