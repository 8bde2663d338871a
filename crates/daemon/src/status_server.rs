//! Status HTTP server
//!
//! Exposes the live [`StatusSnapshot`] as JSON for dashboards and monitoring.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::status::{StatusSnapshot, StatusTracker};

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /status
async fn get_status(State(tracker): State<Arc<StatusTracker>>) -> Json<StatusSnapshot> {
    Json(tracker.snapshot())
}

/// Creates the axum Router with the status endpoint
pub fn create_status_router(tracker: Arc<StatusTracker>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(tracker)
}

/// Serve the status endpoint on `bind` until `shutdown` is cancelled.
pub async fn run_status_server(
    tracker: Arc<StatusTracker>,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;
    let app = create_status_router(tracker);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "status server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
