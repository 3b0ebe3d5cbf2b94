//! Replay Server
//!
//! WebSocket server that streams stored bars back to clients in the live
//! feed's wire shape. Every accepted connection gets its own task, its own
//! freshly built [`SymbolResolver`] and its own [`ReplaySession`]; tasks
//! share only the read-only bar store.
//!
//! # Session Flow
//!
//! 1. Accept the WebSocket handshake
//! 2. Resolve requested symbols against stored history
//! 3. Load one ascending series per distinct resolved symbol
//! 4. Send one multiplexed frame per index, paced by the frame delay
//! 5. Close after the final pass (or when the client leaves)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{BarStore, StoreError};
use crate::application::services::SymbolResolver;
use crate::domain::replay::{ReplayPlan, ReplaySession, ReplayStep};
use crate::infrastructure::alpaca::codec::{CodecError, JsonCodec};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Errors that end a replay connection or the server.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Listener failure.
    #[error("replay listener error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake or socket failure.
    #[error("replay websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Resolver or series load failure.
    #[error("replay store error: {0}")]
    Store(#[from] StoreError),

    /// Frame encoding failure.
    #[error("replay codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Settings and Status
// =============================================================================

/// What every replay connection streams.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    /// Pacing and repeat parameters.
    pub plan: ReplayPlan,
    /// Requested symbols, in frame order.
    pub symbols: Vec<String>,
    /// Symbol served for requests without stored history.
    pub fallback: String,
}

/// Observable server status, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct ReplayStatus {
    listening: AtomicBool,
    active_connections: AtomicUsize,
    sessions_started: AtomicU64,
    frames_sent: AtomicU64,
}

impl ReplayStatus {
    /// Whether the accept loop is running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Connections currently being served.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Connections accepted since startup.
    #[must_use]
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    /// Frames sent across all connections.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

/// Shared replay status handle.
pub type SharedReplayStatus = Arc<ReplayStatus>;

/// Decrements the active connection count when a session task ends.
struct ConnectionGuard {
    status: SharedReplayStatus,
}

impl ConnectionGuard {
    #[allow(clippy::cast_precision_loss)]
    fn enter(status: &SharedReplayStatus) -> Self {
        let active = status.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        status.sessions_started.fetch_add(1, Ordering::Relaxed);
        metrics::set_replay_connections(active as f64);
        Self {
            status: Arc::clone(status),
        }
    }
}

impl Drop for ConnectionGuard {
    #[allow(clippy::cast_precision_loss)]
    fn drop(&mut self) {
        let active = self.status.active_connections.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::set_replay_connections(active as f64);
    }
}

// =============================================================================
// Server
// =============================================================================

/// How a pacing wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    Elapsed,
    ClientClosed,
    Shutdown,
}

/// Per-connection replay server.
pub struct ReplayServer {
    settings: Arc<ReplaySettings>,
    store: Arc<dyn BarStore>,
    status: SharedReplayStatus,
}

impl std::fmt::Debug for ReplayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayServer")
            .field("settings", &self.settings)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl ReplayServer {
    /// Create a server over `store`.
    #[must_use]
    pub fn new(settings: ReplaySettings, store: Arc<dyn BarStore>) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
            status: Arc::new(ReplayStatus::default()),
        }
    }

    /// Status handle for health reporting.
    #[must_use]
    pub fn status(&self) -> SharedReplayStatus {
        Arc::clone(&self.status)
    }

    /// Accept connections until `cancel` fires, then wait for every
    /// session task to wind down.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::Io`] if the listener address is unavailable.
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ReplayError> {
        let addr = listener.local_addr()?;
        self.status.listening.store(true, Ordering::Relaxed);
        tracing::info!(
            %addr,
            mode = self.settings.plan.mode.as_str(),
            speed = self.settings.plan.speed,
            symbols = ?self.settings.symbols,
            "Replay server listening"
        );

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session_id = uuid::Uuid::new_v4();
                        let span = tracing::info_span!("replay_session", %peer, %session_id);
                        sessions.spawn(
                            serve_connection(
                                stream,
                                peer,
                                Arc::clone(&self.settings),
                                Arc::clone(&self.store),
                                Arc::clone(&self.status),
                                cancel.child_token(),
                            )
                            .instrument(span),
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept replay connection"),
                },
            }

            while sessions.try_join_next().is_some() {}
        }

        self.status.listening.store(false, Ordering::Relaxed);
        tracing::info!(active = sessions.len(), "Replay server stopping");
        while sessions.join_next().await.is_some() {}
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    settings: Arc<ReplaySettings>,
    store: Arc<dyn BarStore>,
    status: SharedReplayStatus,
    cancel: CancellationToken,
) {
    let _guard = ConnectionGuard::enter(&status);

    match stream_session(stream, &settings, store.as_ref(), &status, &cancel).await {
        Ok(frames) => tracing::info!(%peer, frames, "Replay connection finished"),
        Err(e) => tracing::error!(%peer, error = %e, "Replay connection failed"),
    }
}

async fn stream_session(
    stream: TcpStream,
    settings: &ReplaySettings,
    store: &dyn BarStore,
    status: &ReplayStatus,
    cancel: &CancellationToken,
) -> Result<u64, ReplayError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    let mut session = match load_session(settings, store).await {
        Ok(session) => session,
        Err(e) => {
            let _ = write.send(Message::Close(None)).await;
            return Err(e);
        }
    };

    if session.is_empty() {
        tracing::info!(
            records = session.total_records(),
            "No stored bars for requested symbols, closing"
        );
        let _ = write.send(Message::Close(None)).await;
        return Ok(0);
    }

    tracing::info!(
        records = session.total_records(),
        frames_per_pass = session.frames_per_pass(),
        "Replay session started"
    );

    let codec = JsonCodec::new();
    let frame_delay = settings.plan.frame_delay();
    let mut frames: u64 = 0;

    loop {
        let wait = match session.next_step(Utc::now()) {
            ReplayStep::Frame(bars) => {
                let text = codec.encode_bars(&bars)?;
                write.send(Message::Text(text.into())).await?;
                frames += 1;
                status.frames_sent.fetch_add(1, Ordering::Relaxed);
                metrics::record_replay_frame();
                tracing::trace!(entries = bars.len(), "Sent replay frame");
                frame_delay
            }
            ReplayStep::PassComplete { completed } => {
                tracing::info!(completed, "Replay pass complete");
                settings.plan.loop_pause
            }
            ReplayStep::Finished => break,
        };

        match pace(wait, &mut read, cancel).await {
            Pacing::Elapsed => {}
            Pacing::ClientClosed => {
                tracing::info!(frames, "Client closed replay connection");
                return Ok(frames);
            }
            Pacing::Shutdown => {
                tracing::info!(frames, "Replay interrupted by shutdown");
                break;
            }
        }
    }

    // The peer may already be gone.
    let _ = write.send(Message::Close(None)).await;
    Ok(frames)
}

async fn load_session(settings: &ReplaySettings, store: &dyn BarStore) -> Result<ReplaySession, ReplayError> {
    let resolver = SymbolResolver::build(&settings.symbols, store, &settings.fallback).await?;

    let mut series = HashMap::new();
    for symbol in resolver.distinct_resolved() {
        let bars = store.load_series(&symbol).await?;
        tracing::debug!(symbol = %symbol, count = bars.len(), "Loaded replay series");
        series.insert(symbol, bars);
    }

    Ok(ReplaySession::new(resolver.lanes(), series, &settings.plan))
}

/// Wait `duration` while watching the client and the shutdown token.
/// Inbound frames other than close are ignored.
async fn pace(
    duration: Duration,
    read: &mut SplitStream<WebSocketStream<TcpStream>>,
    cancel: &CancellationToken,
) -> Pacing {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return Pacing::Elapsed,
            () = cancel.cancelled() => return Pacing::Shutdown,
            inbound = read.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => return Pacing::ClientClosed,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Replay client read failed");
                    return Pacing::ClientClosed;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::InMemoryBarStore;
    use crate::domain::replay::ReplayMode;

    fn settings() -> ReplaySettings {
        ReplaySettings {
            plan: ReplayPlan {
                mode: ReplayMode::SinglePass,
                speed: 1.0,
                loop_count: 0,
                loop_pause: Duration::from_secs(1),
            },
            symbols: vec!["AAPL".to_string()],
            fallback: "AAPL".to_string(),
        }
    }

    #[test]
    fn fresh_status_is_idle() {
        let server = ReplayServer::new(settings(), Arc::new(InMemoryBarStore::new()));
        let status = server.status();

        assert!(!status.is_listening());
        assert_eq!(status.active_connections(), 0);
        assert_eq!(status.sessions_started(), 0);
    }

    #[test]
    fn guard_tracks_active_connections() {
        let status: SharedReplayStatus = Arc::new(ReplayStatus::default());
        {
            let _a = ConnectionGuard::enter(&status);
            let _b = ConnectionGuard::enter(&status);
            assert_eq!(status.active_connections(), 2);
        }
        assert_eq!(status.active_connections(), 0);
        assert_eq!(status.sessions_started(), 2);
    }

    #[tokio::test]
    async fn load_session_against_empty_store_is_empty() {
        let store = InMemoryBarStore::new();
        let mut settings = settings();
        settings.symbols = vec!["AAPL".to_string(), "PDFS".to_string()];

        let session = load_session(&settings, &store).await.unwrap();

        assert!(session.is_empty());
        assert_eq!(session.total_records(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = ReplayServer::new(settings(), Arc::new(InMemoryBarStore::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), server.run(listener, cancel)).await;

        assert!(matches!(result, Ok(Ok(()))));
        assert!(!server.status().is_listening());
    }
}
