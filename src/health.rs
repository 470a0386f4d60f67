//! HTTP readiness endpoint.
//!
//! `GET /ready` answers `200 OK` once a snapshot has been derived and the
//! event subscription is up, and `503` otherwise. DNS answers are served
//! regardless of readiness.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::DnsError;
use crate::state::DnsState;

/// Router exposing the readiness probe.
pub fn router(state: DnsState) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .with_state(state)
}

async fn ready(State(state): State<DnsState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Serve the readiness probe on `addr` until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    state: DnsState,
    cancel: CancellationToken,
) -> Result<(), DnsError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "readiness endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}
