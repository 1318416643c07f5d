//! Session lifecycle handlers.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};

use crate::{
    error::ServerError,
    models::{
        common::{non_blank, require_session_id},
        CloseSessionQuery, OpenSessionQuery, SessionResponse, SessionSummary, SessionsResponse,
    },
    state::AppState,
};

/// `GET /api/v1/open_inference_session`
pub async fn handle_open_session(
    State(state): State<AppState>,
    query: Result<Query<OpenSessionQuery>, QueryRejection>,
) -> Result<Json<SessionResponse>, ServerError> {
    let Query(query) = query?;
    let model = non_blank(query.model).unwrap_or_else(|| state.catalog.default_model().to_string());
    let max_length = query.max_length.unwrap_or(state.config.default_max_length);
    tracing::info!(%model, max_length, "open_inference_session()");

    let id = state.registry.open(&model, max_length).await?;
    Ok(Json(SessionResponse::new(id)))
}

/// `GET /api/v1/close_inference_session`
pub async fn handle_close_session(
    State(state): State<AppState>,
    query: Result<Query<CloseSessionQuery>, QueryRejection>,
) -> Result<Json<SessionResponse>, ServerError> {
    let Query(query) = query?;
    let id = require_session_id(query.session_id)?;
    tracing::info!(session = %id, "close_inference_session()");

    state.registry.close(&id).await?;
    Ok(Json(SessionResponse::new(id)))
}

/// `GET /api/v1/sessions`
pub async fn handle_list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    let sessions: Vec<SessionSummary> = state
        .registry
        .snapshot()
        .into_iter()
        .map(SessionSummary::from)
        .collect();
    Json(SessionsResponse {
        ok: true,
        active: sessions.len(),
        sessions,
        max_sessions: state.registry.capacity(),
    })
}
