//! Health check handler.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Handle health check requests. Includes session utilization stats.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let active = state.registry.len();
    let max_sessions = state.registry.capacity();
    Json(json!({
        "status": "ok",
        "default_model": state.catalog.default_model(),
        "models": state.catalog.names().collect::<Vec<_>>(),
        "sessions": {
            "active": active,
            "max_sessions": max_sessions,
            "available": max_sessions.saturating_sub(active),
        }
    }))
}
