//! Server setup and routing.

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::{handlers, state::AppState};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/open_inference_session",
            get(handlers::handle_open_session),
        )
        .route(
            "/api/v1/close_inference_session",
            get(handlers::handle_close_session),
        )
        .route(
            "/api/v1/generate",
            post(handlers::handle_generate).get(handlers::handle_generate),
        )
        .route("/api/v1/sessions", get(handlers::handle_list_sessions))
        .route("/health", get(handlers::handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server until Ctrl-C, with the session reaper alongside. Every open
/// session is released before returning.
pub async fn run_server(state: AppState) -> std::io::Result<()> {
    let addr = state.config.bind;
    let shutdown = CancellationToken::new();
    let reaper = state
        .registry
        .spawn_reaper(state.config.sweep_interval(), shutdown.clone());

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
                _ = signal.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!(error = %e, "session reaper exited abnormally");
    }
    let released = state.registry.close_all().await;
    tracing::info!(released, "released open sessions");
    served
}
