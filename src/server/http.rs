//! Operator control/status surface: two control endpoints (enable/disable
//! the broker stream), one status endpoint, and a liveness probe.
//!
//! This is deliberately narrow — `spec.md` §6 names exactly this surface,
//! not a general administration API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::execution::CoreState;
use crate::infrastructure::websocket::StreamState;

/// Everything the status/control surface needs a handle to. Cheap to
/// clone; every field is itself an `Arc` or shares interior mutability.
#[derive(Clone)]
pub struct ControlServer {
    core: Arc<CoreState>,
    stream_state: Arc<tokio::sync::RwLock<StreamState>>,
    last_connected: Arc<tokio::sync::RwLock<Option<DateTime<Utc>>>>,
    stream_enabled: Arc<AtomicBool>,
    rehydration_complete: Arc<AtomicBool>,
}

impl ControlServer {
    /// Builds a control surface over `core`, observing `stream_state` and
    /// `last_connected` (the orders stream's `StreamHandle`, the one the
    /// reconnect barrier watcher subscribes to) and gating stream activity
    /// through `stream_enabled`.
    #[must_use]
    pub fn new(
        core: Arc<CoreState>,
        stream_state: Arc<tokio::sync::RwLock<StreamState>>,
        last_connected: Arc<tokio::sync::RwLock<Option<DateTime<Utc>>>>,
        stream_enabled: Arc<AtomicBool>,
        rehydration_complete: Arc<AtomicBool>,
    ) -> Self {
        Self {
            core,
            stream_state,
            last_connected,
            stream_enabled,
            rehydration_complete,
        }
    }
}

/// Builds the axum router for the control/status surface.
#[must_use]
pub fn create_router(server: ControlServer) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/status", get(status))
        .route("/v1/stream/enable", post(enable_stream))
        .route("/v1/stream/disable", post(disable_stream))
        .with_state(server)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Response body for `GET /v1/status`, matching `spec.md` §6 exactly.
#[derive(Debug, Serialize)]
struct StatusResponse {
    streams_connected: bool,
    cache_sizes: CacheSizes,
    last_reconnect_at: Option<DateTime<Utc>>,
    active_stop_limits: usize,
    rehydration_complete: bool,
}

#[derive(Debug, Serialize)]
struct CacheSizes {
    orders: usize,
    positions: usize,
    stop_limit_repository: usize,
    tracker_progress: usize,
}

async fn status(State(server): State<ControlServer>) -> Json<StatusResponse> {
    let streams_connected = matches!(*server.stream_state.read().await, StreamState::Connected);
    let cache_sizes = CacheSizes {
        orders: server.core.orders.read().await.len(),
        positions: server.core.positions.read().await.len(),
        stop_limit_repository: server.core.stop_limit_repository.read().await.len(),
        tracker_progress: server.core.tracker_progress.read().await.len(),
    };
    let last_reconnect_at = *server.last_connected.read().await;
    let active_stop_limits = server.core.stop_limit_repository.read().await.len();

    Json(StatusResponse {
        streams_connected,
        cache_sizes,
        last_reconnect_at,
        active_stop_limits,
        rehydration_complete: server.rehydration_complete.load(Ordering::Relaxed),
    })
}

async fn enable_stream(State(server): State<ControlServer>) -> impl IntoResponse {
    server.stream_enabled.store(true, Ordering::Relaxed);
    (StatusCode::OK, Json(serde_json::json!({ "streamEnabled": true })))
}

async fn disable_stream(State(server): State<ControlServer>) -> impl IntoResponse {
    server.stream_enabled.store(false, Ordering::Relaxed);
    (StatusCode::OK, Json(serde_json::json!({ "streamEnabled": false })))
}
