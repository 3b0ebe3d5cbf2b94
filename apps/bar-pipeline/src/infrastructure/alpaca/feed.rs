//! Live Bar Feed Client
//!
//! Connects to Alpaca's market data stream, subscribes to the `bars`
//! channel for the configured symbols and stages every incoming bar.
//!
//! # Stream URL
//!
//! - `wss://stream.data.alpaca.markets/v2/{iex|sip}`
//!
//! # Loop
//!
//! One cooperative loop, no background tasks. Each iteration checks the
//! market clock, flushes staging inline when the flush interval has elapsed,
//! then waits a bounded time for one frame. While a flush runs no frames are
//! drained.
//!
//! A run ends on market close, shutdown, or socket close. There is no
//! reconnect: the process is restarted externally.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::{AUTH_TIMEOUT, AuthError, AuthHandshake, Credentials};
use super::codec::{CodecError, JsonCodec};
use super::messages::{FeedMessage, SubscriptionRequest};
use crate::application::ports::{MarketClock, StagingBuffer};
use crate::application::services::PersistenceFlusher;
use crate::domain::feed::FeedConnectionState;
use crate::infrastructure::metrics::{self, DropReason, FlushOutcome};

/// Longest single sleep while waiting for the market to open.
const MAX_OPEN_WAIT: Duration = Duration::from_secs(15 * 60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a feed run abnormally.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// WebSocket error while connecting or sending control frames.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// API credentials.
    pub credentials: Credentials,
    /// Symbols to subscribe and stage.
    pub symbols: Vec<String>,
    /// Interval between inline flushes.
    pub flush_interval: Duration,
    /// Bound on one frame receive.
    pub recv_timeout: Duration,
    /// Bound on the auth handshake.
    pub auth_timeout: Duration,
}

impl FeedClientConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: String, credentials: Credentials, symbols: Vec<String>) -> Self {
        Self {
            url,
            credentials,
            symbols,
            flush_interval: Duration::from_secs(3600),
            recv_timeout: Duration::from_secs(1),
            auth_timeout: AUTH_TIMEOUT,
        }
    }

    /// Stream URL for an Alpaca feed name (`iex` or `sip`).
    #[must_use]
    pub fn stream_url(feed: &str) -> String {
        format!("wss://stream.data.alpaca.markets/v2/{feed}")
    }
}

// =============================================================================
// Feed State Tracking
// =============================================================================

/// Observable state of the feed, shared with the health server.
#[derive(Debug, Default)]
pub struct FeedState {
    state: RwLock<FeedConnectionState>,
    last_flush_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    frames_received: AtomicU64,
    bars_staged: AtomicU64,
}

/// Shared handle to feed state.
pub type SharedFeedState = Arc<FeedState>;

impl FeedState {
    /// Create a tracker in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: FeedConnectionState) {
        *self.state.write() = state;
        tracing::debug!(state = state.as_str(), "Feed state changed");
    }

    /// Record an error that ended or disturbed the run.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Record a completed flush attempt.
    pub fn mark_flushed(&self) {
        *self.last_flush_at.write() = Some(Utc::now());
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> FeedConnectionState {
        *self.state.read()
    }

    /// Time of the last flush attempt.
    #[must_use]
    pub fn last_flush_at(&self) -> Option<DateTime<Utc>> {
        *self.last_flush_at.read()
    }

    /// Last recorded error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Text frames received.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Bars written to staging.
    #[must_use]
    pub fn bars_staged(&self) -> u64 {
        self.bars_staged.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// How a feed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The market clock reported closed; unsubscribed gracefully.
    MarketClosed,
    /// The server closed the socket or it failed.
    SocketClosed,
    /// Shutdown was requested.
    Cancelled,
}

/// An authenticated, subscribed connection.
pub struct FeedConnection {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection").finish_non_exhaustive()
    }
}

/// Live bar feed client.
pub struct FeedClient {
    config: FeedClientConfig,
    symbols: HashSet<String>,
    codec: JsonCodec,
    staging: Arc<dyn StagingBuffer>,
    clock: Arc<dyn MarketClock>,
    flusher: Arc<PersistenceFlusher>,
    state: SharedFeedState,
    cancel: CancellationToken,
}

impl FeedClient {
    /// Create a new feed client.
    #[must_use]
    pub fn new(
        config: FeedClientConfig,
        staging: Arc<dyn StagingBuffer>,
        clock: Arc<dyn MarketClock>,
        flusher: Arc<PersistenceFlusher>,
        state: SharedFeedState,
        cancel: CancellationToken,
    ) -> Self {
        let symbols = config.symbols.iter().cloned().collect();
        Self {
            config,
            symbols,
            codec: JsonCodec::new(),
            staging,
            clock,
            flusher,
            state,
            cancel,
        }
    }

    /// Shared state handle.
    #[must_use]
    pub fn state(&self) -> SharedFeedState {
        Arc::clone(&self.state)
    }

    /// Wait for the market to open, then connect and stream until the run ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the auth handshake fails.
    pub async fn run(&self) -> Result<FeedOutcome, FeedClientError> {
        if !self.wait_for_open().await {
            self.state.set_state(FeedConnectionState::Closed);
            return Ok(FeedOutcome::Cancelled);
        }

        let connection = match self.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                self.state.set_error(e.to_string());
                self.state.set_state(FeedConnectionState::Closed);
                return Err(e);
            }
        };

        self.stream(connection).await
    }

    /// Sleep until the clock reports open. Returns `false` if cancelled first.
    async fn wait_for_open(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }

            let delay = match self.clock.status().await {
                Ok(status) if status.is_open => return true,
                Ok(status) => {
                    let until_open = status
                        .next_open
                        .and_then(|next| (next - Utc::now()).to_std().ok())
                        .unwrap_or_default();
                    tracing::info!(
                        next_open = ?status.next_open,
                        "Market closed, waiting for open"
                    );
                    until_open.max(self.config.recv_timeout).min(MAX_OPEN_WAIT)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Market clock query failed, assuming open");
                    return true;
                }
            };

            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Open the socket, authenticate and subscribe.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened, the auth ack is not a
    /// success, no ack arrives within the auth timeout, or the subscribe
    /// frame cannot be sent.
    pub async fn connect(&self) -> Result<FeedConnection, FeedClientError> {
        tracing::info!(url = %self.config.url, "Connecting to bar stream");
        self.state.set_state(FeedConnectionState::Authenticating);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let mut handshake = AuthHandshake::new(self.config.credentials.clone());
        let auth_json = self.codec.encode(&handshake.request())?;
        write.send(Message::Text(auth_json.into())).await?;

        tokio::time::timeout(
            self.config.auth_timeout,
            self.await_auth_ack(&mut handshake, &mut write, &mut read),
        )
        .await
        .map_err(|_| AuthError::Timeout(self.config.auth_timeout))??;

        tracing::info!("Bar stream authenticated");

        let request = SubscriptionRequest::subscribe().with_bars(self.config.symbols.clone());
        let json = self.codec.encode(&request)?;
        write.send(Message::Text(json.into())).await?;

        self.state.set_state(FeedConnectionState::Subscribed);
        tracing::info!(symbols = ?self.config.symbols, "Subscribed to bars");

        Ok(FeedConnection { write, read })
    }

    async fn await_auth_ack(
        &self,
        handshake: &mut AuthHandshake,
        write: &mut SplitSink<WsStream, Message>,
        read: &mut SplitStream<WsStream>,
    ) -> Result<(), FeedClientError> {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame = self
                        .codec
                        .decode(text.as_str())
                        .map_err(|e| handshake.reject(&e.to_string()))?;

                    if let Some(rejected) = frame.rejected.first() {
                        return Err(handshake.reject(&rejected.to_string()).into());
                    }
                    for message in &frame.messages {
                        if handshake.observe(message)? {
                            return Ok(());
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(AuthError::ConnectionClosed.into());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Run the streaming loop on an established connection.
    ///
    /// # Errors
    ///
    /// Socket failures end the run with [`FeedOutcome::SocketClosed`], not an
    /// error; the `Result` is kept for symmetry with [`Self::connect`].
    pub async fn stream(&self, connection: FeedConnection) -> Result<FeedOutcome, FeedClientError> {
        let FeedConnection {
            mut write,
            mut read,
        } = connection;
        let mut last_flush = Instant::now();

        self.state.set_state(FeedConnectionState::Streaming);

        let outcome = loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Shutdown requested, leaving bar stream");
                self.unsubscribe(&mut write).await;
                break FeedOutcome::Cancelled;
            }

            match self.clock.status().await {
                Ok(status) if !status.is_open => {
                    tracing::info!(next_open = ?status.next_open, "Market closed, leaving bar stream");
                    self.unsubscribe(&mut write).await;
                    break FeedOutcome::MarketClosed;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Market clock query failed, assuming still open");
                }
            }

            if last_flush.elapsed() >= self.config.flush_interval {
                self.flush_staging("interval").await;
                last_flush = Instant::now();
            }

            let Ok(next) = tokio::time::timeout(self.config.recv_timeout, read.next()).await else {
                continue;
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()).await,
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        tracing::warn!(error = %e, "Failed to answer ping");
                        self.state.set_error(e.to_string());
                        break FeedOutcome::SocketClosed;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    break FeedOutcome::SocketClosed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Bar stream socket error");
                    self.state.set_error(e.to_string());
                    break FeedOutcome::SocketClosed;
                }
                None => {
                    tracing::info!("Bar stream ended");
                    break FeedOutcome::SocketClosed;
                }
            }
        };

        self.flush_staging("final").await;
        self.state.set_state(FeedConnectionState::Closed);
        tracing::info!(outcome = ?outcome, "Feed run finished");
        Ok(outcome)
    }

    async fn unsubscribe(&self, write: &mut SplitSink<WsStream, Message>) {
        let request = SubscriptionRequest::unsubscribe().with_bars(self.config.symbols.clone());
        let sent = match self.codec.encode(&request) {
            Ok(json) => write.send(Message::Text(json.into())).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, "Failed to send unsubscribe");
            return;
        }
        if let Err(e) = write.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "Failed to send close frame");
        }
    }

    async fn flush_staging(&self, reason: &'static str) {
        let started = Instant::now();
        match self.flusher.flush().await {
            Ok(report) => {
                let outcome = if report.committed == 0 {
                    FlushOutcome::Empty
                } else {
                    FlushOutcome::Committed
                };
                metrics::record_flush(outcome, report.committed as u64, started.elapsed());
                if report.delete_failures > 0 {
                    metrics::record_delete_failures(report.delete_failures as u64);
                }
                tracing::debug!(reason, committed = report.committed, "Inline flush finished");
            }
            Err(e) => {
                metrics::record_flush(FlushOutcome::Failed, 0, started.elapsed());
                tracing::warn!(reason, error = %e, "Inline flush failed, retrying next interval");
            }
        }
        self.state.mark_flushed();
    }

    async fn handle_frame(&self, text: &str) {
        self.state.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_received();

        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                metrics::record_bar_dropped(DropReason::Malformed);
                return;
            }
        };

        for rejected in &frame.rejected {
            tracing::warn!(error = %rejected, "Dropping malformed message");
            metrics::record_bar_dropped(DropReason::Malformed);
        }

        for message in frame.messages {
            match message {
                FeedMessage::Bar(bar) => {
                    if !self.symbols.contains(&bar.symbol) {
                        tracing::warn!(symbol = %bar.symbol, "Dropping bar for unsubscribed symbol");
                        metrics::record_bar_dropped(DropReason::UnknownSymbol);
                        continue;
                    }
                    let entry = bar.to_staging_entry();
                    match self.staging.put(&entry).await {
                        Ok(()) => {
                            self.state.bars_staged.fetch_add(1, Ordering::Relaxed);
                            metrics::record_bar_staged();
                            tracing::trace!(key = %entry.key(), "Bar staged");
                        }
                        Err(e) => {
                            tracing::warn!(key = %entry.key(), error = %e, "Failed to stage bar");
                            metrics::record_bar_dropped(DropReason::StagingError);
                        }
                    }
                }
                FeedMessage::Subscription(sub) => {
                    tracing::info!(bars = ?sub.bars, "Subscription confirmed");
                }
                FeedMessage::Error(error) => {
                    tracing::warn!(code = error.code, msg = %error.msg, "Bar stream error message");
                }
                FeedMessage::Success(success) => {
                    tracing::debug!(msg = ?success.msg, "Bar stream success message");
                }
            }
        }
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("config", &self.config)
            .field("state", &self.state.get_state())
            .finish_non_exhaustive()
    }
}
