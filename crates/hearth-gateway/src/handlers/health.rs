//! Liveness probe.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "entities": state.simulator.store().entity_count(),
        "timestamp": state.simulator.clock().now().to_rfc3339(),
    }))
}
