//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, pipeline status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (feed streaming, or replay listening)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::feed::FeedConnectionState;
use crate::infrastructure::alpaca::feed::{FeedState, SharedFeedState};
use crate::infrastructure::config::Mode;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::replay::{ReplayStatus, SharedReplayStatus};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Pipeline version.
    pub version: String,
    /// Running mode.
    pub mode: &'static str,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Live feed status (live mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<FeedInfo>,
    /// Replay server status (replay mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplayInfo>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Running but not currently serving (e.g. waiting for market open).
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

/// Live feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: FeedConnectionState,
    /// Whether bars can currently arrive.
    pub connected: bool,
    /// Text frames received.
    pub frames_received: u64,
    /// Bars written to staging.
    pub bars_staged: u64,
    /// Last flush attempt.
    pub last_flush_at: Option<DateTime<Utc>>,
    /// Last recorded error.
    pub last_error: Option<String>,
}

/// Replay server status.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayInfo {
    /// Whether the accept loop is running.
    pub listening: bool,
    /// Connections currently being served.
    pub active_connections: usize,
    /// Connections accepted since startup.
    pub sessions_started: u64,
    /// Frames sent across all connections.
    pub frames_sent: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Component whose status the health server reports.
#[derive(Debug, Clone)]
pub enum Monitored {
    /// The live feed client.
    Feed(SharedFeedState),
    /// The replay server.
    Replay(SharedReplayStatus),
}

impl Monitored {
    const fn mode(&self) -> Mode {
        match self {
            Self::Feed(_) => Mode::Live,
            Self::Replay(_) => Mode::Replay,
        }
    }
}

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    monitored: Monitored,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, monitored: Monitored) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            monitored,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by the health server.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let is_ready = match &state.monitored {
        Monitored::Feed(feed) => feed.get_state().is_live(),
        Monitored::Replay(replay) => replay.is_listening(),
    };

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let (status, feed, replay) = match &state.monitored {
        Monitored::Feed(feed) => {
            let info = feed_info(feed);
            (feed_health(&info), Some(info), None)
        }
        Monitored::Replay(replay) => {
            let info = replay_info(replay);
            let status = if info.listening {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            };
            (status, None, Some(info))
        }
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        mode: state.monitored.mode().as_str(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        replay,
    }
}

fn feed_info(state: &FeedState) -> FeedInfo {
    let connection_state = state.get_state();
    FeedInfo {
        state: connection_state,
        connected: connection_state.is_live(),
        frames_received: state.frames_received(),
        bars_staged: state.bars_staged(),
        last_flush_at: state.last_flush_at(),
        last_error: state.last_error(),
    }
}

fn replay_info(status: &ReplayStatus) -> ReplayInfo {
    ReplayInfo {
        listening: status.is_listening(),
        active_connections: status.active_connections(),
        sessions_started: status.sessions_started(),
        frames_sent: status.frames_sent(),
    }
}

fn feed_health(info: &FeedInfo) -> HealthStatus {
    match info.state {
        FeedConnectionState::Subscribed | FeedConnectionState::Streaming => HealthStatus::Healthy,
        FeedConnectionState::Closed if info.last_error.is_some() => HealthStatus::Unhealthy,
        // Waiting for market open, handshaking, or closed for the day.
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
