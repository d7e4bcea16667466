use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub engine_type: &'static str,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub engine: EngineStatus,
}

/// GET /health - liveness plus engine reachability
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let engine_type = state.engine.engine_type();
    let engine = match state.engine.health_check().await {
        Ok(health) => EngineStatus {
            engine_type,
            healthy: health.is_healthy,
            version: health.version,
            error: None,
        },
        Err(e) => {
            tracing::warn!(engine = engine_type, "Engine health check failed: {}", e);
            EngineStatus {
                engine_type,
                healthy: false,
                version: None,
                error: Some(e.to_string()),
            }
        }
    };

    // The scheduler keeps serving degraded requests while the engine is down.
    let status = if engine.healthy { "ok" } else { "degraded" };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            engine,
        }),
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}
