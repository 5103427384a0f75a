//! HTTP server for health, metrics and event pool listing

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tracing::info;

use crate::relay::DualRelay;
use crate::types::{DualEvent, RelayState};

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<DualRelay>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: RelayState,
    pub pool_size: usize,
    pub latest_head: i64,
}

/// Event pool listing response
#[derive(Serialize)]
pub struct EventsResponse {
    pub count: usize,
    pub events: Vec<DualEvent>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let relay_state = state.relay.state();
    let status = match relay_state {
        RelayState::Terminated => "unhealthy",
        _ => "healthy",
    };
    Json(HealthResponse {
        status: status.to_string(),
        state: relay_state,
        pool_size: state.relay.pool().len().await,
        latest_head: state.relay.metrics().latest_head.get(),
    })
}

/// Liveness probe
async fn liveness() -> &'static str {
    "OK"
}

async fn list_events(State(state): State<AppState>) -> Json<EventsResponse> {
    let events: Vec<DualEvent> = state
        .relay
        .pool()
        .events()
        .await
        .iter()
        .map(|event| event.as_ref().clone())
        .collect();
    Json(EventsResponse {
        count: events.len(),
        events,
    })
}

/// Prometheus metrics endpoint
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let metrics = state.relay.metrics();
    metrics.pool_size.set(state.relay.pool().len().await as i64);

    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(relay: Arc<DualRelay>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .route("/events", get(list_events))
        .with_state(AppState { relay })
}

/// Start the HTTP server
pub async fn start_server(bind_address: &str, port: u16, relay: Arc<DualRelay>) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("API server listening on {}", addr);
    info!("  /health  - Relay state and pool size (JSON)");
    info!("  /metrics - Prometheus metrics");
    info!("  /events  - Event pool listing (JSON)");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(relay)).await?;

    Ok(())
}
