pub mod health;
pub mod models;
pub mod status;
pub mod submit;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Every route of the ingress and diagnostics surface.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router(state.clone()))
        .nest(
            "/v1",
            Router::new()
                .merge(models::router(state.clone()))
                .merge(status::router(state.clone()))
                .merge(submit::router(state)),
        )
}
