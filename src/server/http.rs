// src/server/http.rs

//! Small HTTP surfaces: Prometheus `/metrics` and the connection admin routes.

use super::api::ServerApi;
use crate::core::RelayError;
use crate::core::conn_id::ConnId;
use crate::core::metrics::Metrics;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, http::StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Handles HTTP requests to the /metrics endpoint.
///
/// It refreshes the connection gauges before gathering all registered metrics
/// and encoding them in the Prometheus text format.
async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    let body = metrics.gather().await;
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

async fn list_handler(State(api): State<ServerApi>) -> Response {
    match api.list_connections().await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(e),
    }
}

async fn kick_handler(State(api): State<ServerApi>, Path(id): Path<String>) -> Response {
    match api.kick_connection(&ConnId::from(id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: RelayError) -> Response {
    let status = match e {
        RelayError::NotFound => StatusCode::NOT_FOUND,
        RelayError::Terminated => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

pub fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

pub fn api_router(api: ServerApi) -> Router {
    Router::new()
        .route("/v1/rtmpconns/list", get(list_handler))
        .route("/v1/rtmpconns/kick/{id}", post(kick_handler))
        .with_state(api)
}

/// Serves `app` on `addr` until `shutdown` is cancelled.
pub async fn run_http_server(
    name: &'static str,
    addr: SocketAddr,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), RelayError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::bind(addr.to_string(), e))?;
    info!("{} listening on http://{}", name, listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("{} shutting down.", name);
        })
        .await?;
    Ok(())
}
