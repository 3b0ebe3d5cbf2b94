//! Bar Pipeline Binary
//!
//! Runs either the live ingestion half or the replay half of the pipeline.
//!
//! # Usage
//!
//! ```bash
//! PIPELINE_MODE=live cargo run --bin bar-pipeline
//! PIPELINE_MODE=replay cargo run --bin bar-pipeline
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TRADING_SYMBOLS`: Comma-separated symbol universe
//! - `DATABASE_URL`: PostgreSQL connection URL
//! - `ALPACA_KEY` / `ALPACA_SECRET`: Alpaca API credentials (live mode)
//!
//! ## Optional
//! - `PIPELINE_MODE`: live | replay (default: live)
//! - `ALPACA_FEED`: iex | sip (default: iex)
//! - `FLUSH_INTERVAL_SECS`: Staging flush cadence (default: 3600)
//! - `REPLAY_MODE`: single_pass | loop (default: single_pass)
//! - `REPLAY_SPEED`: Pacing multiplier (default: 1.0)
//! - `REPLAY_HOST` / `REPLAY_PORT`: Replay bind address (default: 0.0.0.0:8765)
//! - `REDIS_URL`: Staging buffer (default: redis://127.0.0.1:6379)
//! - `PIPELINE_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bar_pipeline::infrastructure::alpaca::clock::AlpacaClock;
use bar_pipeline::infrastructure::telemetry;
use bar_pipeline::{
    BarStore, Database, FeedClient, FeedClientConfig, FeedOutcome, FeedState, HealthServer,
    HealthServerState, Mode, Monitored, PersistenceFlusher, PgBarRepository, PipelineConfig,
    RedisStagingBuffer, ReplayServer, init_metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_crypto_provider();

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting bar pipeline");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let database = Database::connect(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    let repository = PgBarRepository::new(database);
    repository
        .ensure_schema()
        .await
        .context("failed to prepare bar schema")?;
    let store: Arc<dyn BarStore> = Arc::new(repository);

    match config.mode {
        Mode::Live => run_live(&config, store, shutdown_token.clone()).await?,
        Mode::Replay => run_replay(&config, store, shutdown_token.clone()).await?,
    }

    shutdown_token.cancel();
    tracing::info!("Bar pipeline stopped");
    Ok(())
}

async fn run_live(
    config: &PipelineConfig,
    store: Arc<dyn BarStore>,
    shutdown_token: CancellationToken,
) -> anyhow::Result<()> {
    let credentials = config.credentials()?.clone();

    let staging = Arc::new(
        RedisStagingBuffer::connect(&config.redis_url)
            .await
            .context("failed to connect to Redis")?,
    );
    let clock = Arc::new(AlpacaClock::new(&config.feed.trading_url, credentials.clone())?);
    let flusher = Arc::new(PersistenceFlusher::new(
        staging.clone(),
        store,
        config.symbols.clone(),
        config.feed.flush_data_source,
    ));

    let feed_state = Arc::new(FeedState::new());
    spawn_health_server(
        config.server.health_port,
        Monitored::Feed(Arc::clone(&feed_state)),
        shutdown_token.clone(),
    );

    let mut feed_config =
        FeedClientConfig::new(config.feed.stream_url.clone(), credentials, config.symbols.clone());
    feed_config.flush_interval = config.feed.flush_interval;
    feed_config.recv_timeout = config.feed.recv_timeout;

    let client = FeedClient::new(feed_config, staging, clock, flusher, feed_state, shutdown_token);

    tracing::info!("Live feed ready");
    let outcome = client.run().await.context("live feed failed")?;
    match outcome {
        FeedOutcome::MarketClosed => tracing::info!("Market closed, feed finished for the day"),
        FeedOutcome::SocketClosed => tracing::warn!("Feed socket closed, restart to resume"),
        FeedOutcome::Cancelled => tracing::info!("Feed stopped by shutdown"),
    }
    Ok(())
}

async fn run_replay(
    config: &PipelineConfig,
    store: Arc<dyn BarStore>,
    shutdown_token: CancellationToken,
) -> anyhow::Result<()> {
    let bind_addr = config.replay.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind replay server on {bind_addr}"))?;

    let server = ReplayServer::new(config.replay_settings(), store);
    spawn_health_server(
        config.server.health_port,
        Monitored::Replay(server.status()),
        shutdown_token.clone(),
    );

    tracing::info!("Replay server ready");
    server.run(listener, shutdown_token).await?;
    Ok(())
}

fn spawn_health_server(port: u16, monitored: Monitored, shutdown_token: CancellationToken) {
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        monitored,
    ));
    let health_server = HealthServer::new(port, health_state, shutdown_token);

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });
}

#[allow(clippy::expect_used)]
fn install_crypto_provider() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &PipelineConfig) {
    tracing::info!(
        mode = config.mode.as_str(),
        symbols = ?config.symbols,
        fallback = %config.fallback_symbol,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    match config.mode {
        Mode::Live => tracing::debug!(
            feed = config.feed.feed.as_str(),
            stream_url = %config.feed.stream_url,
            trading_url = %config.feed.trading_url,
            flush_interval_secs = config.feed.flush_interval.as_secs(),
            data_source = %config.feed.flush_data_source,
            "Live feed settings"
        ),
        Mode::Replay => tracing::debug!(
            addr = %config.replay.bind_addr(),
            replay_mode = config.replay.plan.mode.as_str(),
            speed = config.replay.plan.speed,
            loop_count = config.replay.plan.loop_count,
            "Replay settings"
        ),
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    // Force exit if components do not wind down in time.
    tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
    tracing::error!("Graceful shutdown timed out, exiting");
    std::process::exit(1);
}
