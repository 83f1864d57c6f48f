//! HTTP/WebSocket server boundary.

pub mod routes;
pub mod state;
pub mod websocket;

pub use state::ServerState;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::status::StatusBroadcaster;
use websocket::{run_status_subscriber, ws_handler};

/// Build the application router.
pub fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/enqueue", post(routes::enqueue))
        .route("/api/sessions/by_path", get(routes::session_by_path))
        .route("/api/sessions/{hash}", get(routes::session_by_hash))
        .route("/api/jobs", get(routes::list_jobs))
        .route("/api/jobs/{id}", get(routes::get_job).delete(routes::revoke_job))
        .route("/ws/status", get(ws_handler))
        .with_state(state)
}

/// Serve until the shutdown token fires. Also owns the status subscriber
/// task that feeds websocket clients.
pub async fn run_server(
    state: ServerState,
    broadcaster: StatusBroadcaster,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let connections = state.connections.clone();
    tokio::spawn(run_status_subscriber(
        broadcaster,
        connections,
        shutdown.clone(),
    ));

    let app = make_app(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")
}
