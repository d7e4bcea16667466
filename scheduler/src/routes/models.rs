//! Read-only model registry view.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use infergate_common::ModelDescriptor;

use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    pub resident: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelEntry>,
}

/// GET /v1/models - configured models and whether each is resident
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let resident: Vec<String> = state
        .scheduler
        .resident_models()
        .into_iter()
        .map(|m| m.model_id)
        .collect();

    let data = state
        .scheduler
        .descriptors()
        .into_iter()
        .map(|descriptor| ModelEntry {
            resident: resident.contains(&descriptor.model_id),
            descriptor,
        })
        .collect();

    Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/models", get(list_models))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::descriptor;

    #[test]
    fn test_models_response_serialization() {
        let response = ModelsResponse {
            object: "list".to_string(),
            data: vec![ModelEntry {
                descriptor: descriptor("minilm"),
                resident: true,
            }],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["object"], "list");
        assert_eq!(json["data"][0]["model_id"], "minilm");
        assert_eq!(json["data"][0]["resident"], true);
        assert_eq!(json["data"][0]["preferred_batch_size"], 3);
    }
}
