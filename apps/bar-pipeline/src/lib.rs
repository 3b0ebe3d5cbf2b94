#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Bar Pipeline - Intraday Bar Ingestion and Replay
//!
//! Ingests one-minute bars from Alpaca's market data WebSocket during market
//! hours, stages them in Redis, commits them to PostgreSQL on a fixed
//! cadence, and replays stored history to any number of WebSocket clients in
//! the same wire shape as the live feed.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure bar pipeline types
//!   - `bar`: OHLCV records and field parsing
//!   - `staging`: string-form entries awaiting commit
//!   - `replay`: pacing plan and per-connection session cursor
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: staging buffer, bar store, market clock
//!   - `services`: symbol resolution, persistence flushing
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `alpaca`: bar stream client, codec, market clock
//!   - `staging`: Redis staging buffer
//!   - `store`: PostgreSQL pool and bar repository
//!   - `replay`: WebSocket replay server
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Alpaca WS --> FeedClient --> Redis staging --> PersistenceFlusher --> Postgres
//!
//! Postgres --> SymbolResolver --> ReplayServer --> Client 1 .. Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core bar types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::bar::{Bar, BarParseError, DataSource};
pub use domain::feed::FeedConnectionState;
pub use domain::replay::{ReplayMode, ReplayPlan, ReplaySession, ReplayStep};
pub use domain::staging::StagingEntry;

// Ports and services
pub use application::ports::{
    BarStore, ClockError, InMemoryBarStore, InMemoryStagingBuffer, ManualMarketClock, MarketClock,
    MarketStatus, StagedRecord, StagingBuffer, StagingError, StoreError,
};
pub use application::services::{FlushError, FlushReport, PersistenceFlusher, SymbolResolver};

// Infrastructure config
pub use infrastructure::config::{ConfigError, DataFeed, Mode, PipelineConfig};

// Adapters
pub use infrastructure::alpaca::auth::Credentials;
pub use infrastructure::alpaca::feed::{
    FeedClient, FeedClientConfig, FeedClientError, FeedOutcome, FeedState, SharedFeedState,
};
pub use infrastructure::replay::{ReplayError, ReplayServer, ReplaySettings, SharedReplayStatus};
pub use infrastructure::staging::RedisStagingBuffer;
pub use infrastructure::store::{Database, DatabaseSettings, DbError, PgBarRepository};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState, Monitored};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
