//! HTTP transport for the RPC surface.
//!
//! `POST /rpc` takes a JSON [`LinkerSwitchRequest`] and answers with a JSON
//! [`LinkerSwitchResponse`]; `GET /health` reports liveness and counters.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::coordinator::{CoordinatorStatsSnapshot, LinkingCoordinator};
use crate::error::RegistryError;
use crate::rpc::{dispatch, LinkerSwitchRequest, LinkerSwitchResponse};

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub programs: usize,
    pub stats: CoordinatorStatsSnapshot,
}

/// Builds the RPC router.
pub fn router(coordinator: Arc<LinkingCoordinator>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .with_state(coordinator)
}

/// Serves the RPC router on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<LinkingCoordinator>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "RPC server listening");
    }

    axum::serve(listener, router(coordinator))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn rpc_handler(
    State(coordinator): State<Arc<LinkingCoordinator>>,
    request: Result<Json<LinkerSwitchRequest>, JsonRejection>,
) -> (StatusCode, Json<LinkerSwitchResponse>) {
    match request {
        Ok(Json(request)) => (StatusCode::OK, Json(dispatch(&coordinator, request).await)),
        Err(rejection) => {
            warn!(error = %rejection, "Malformed RPC request");
            let error = RegistryError::invalid_input("request", rejection.body_text());
            (
                StatusCode::BAD_REQUEST,
                Json(LinkerSwitchResponse::from_error(&error)),
            )
        }
    }
}

async fn health_handler(
    State(coordinator): State<Arc<LinkingCoordinator>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        programs: coordinator.list().len(),
        stats: coordinator.stats(),
    })
}
