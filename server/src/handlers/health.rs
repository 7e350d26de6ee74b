use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::app::SharedState;

/// GET /system/health
/// Reports database readiness; checks again when the gateway is not ready
pub async fn health(State(state): State<SharedState>) -> (StatusCode, Json<Value>) {
    let ready = state.gateway.is_ready() || state.gateway.ping().await;

    if ready {
        (
            StatusCode::OK,
            Json(json!({"status": "operational", "database": "ready"})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded", "database": "unavailable"})),
        )
    }
}
