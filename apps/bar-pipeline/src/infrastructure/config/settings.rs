//! Pipeline Configuration Settings
//!
//! One immutable [`PipelineConfig`] built at startup from environment
//! variables and passed down to every component.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::bar::DataSource;
use crate::domain::replay::{ReplayMode, ReplayPlan};
use crate::infrastructure::alpaca::auth::Credentials;
use crate::infrastructure::alpaca::clock::PAPER_TRADING_URL;
use crate::infrastructure::alpaca::feed::FeedClientConfig;
use crate::infrastructure::replay::ReplaySettings;
use crate::infrastructure::store::DatabaseSettings;

/// Which half of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Ingest live bars and commit them.
    #[default]
    Live,
    /// Serve stored bars over WebSocket.
    Replay,
}

impl Mode {
    /// Parse mode from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "live" => Some(Self::Live),
            "replay" => Some(Self::Replay),
            _ => None,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Replay => "replay",
        }
    }
}

/// Market data feed type for Alpaca streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    /// SIP (Securities Information Processor) - Full market data.
    Sip,
    /// IEX (Investors Exchange) - Free tier with limited data.
    #[default]
    Iex,
}

impl DataFeed {
    /// Parse feed type from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sip" => Self::Sip,
            _ => Self::Iex,
        }
    }

    /// Get the feed name for WebSocket URLs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Iex => "iex",
        }
    }
}

/// Live feed and flush settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Market data feed.
    pub feed: DataFeed,
    /// WebSocket URL of the bar stream.
    pub stream_url: String,
    /// Trading API base URL for the market clock.
    pub trading_url: String,
    /// API credentials; present whenever the mode is live.
    pub credentials: Option<Credentials>,
    /// Interval between inline flushes.
    pub flush_interval: Duration,
    /// Tag applied to committed bars.
    pub flush_data_source: DataSource,
    /// Bound on one frame receive.
    pub recv_timeout: Duration,
}

/// Replay listener settings.
#[derive(Debug, Clone)]
pub struct ReplayEndpoint {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Requested symbols streamed to every connection.
    pub symbols: Vec<String>,
    /// Pacing and repeat parameters.
    pub plan: ReplayPlan,
}

impl ReplayEndpoint {
    /// `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Live or replay.
    pub mode: Mode,
    /// Configured symbol universe.
    pub symbols: Vec<String>,
    /// Symbol served for requests without stored history.
    pub fallback_symbol: String,
    /// Live feed settings.
    pub feed: FeedSettings,
    /// Replay listener settings.
    pub replay: ReplayEndpoint,
    /// Durable store pool.
    pub database: DatabaseSettings,
    /// Staging buffer URL.
    pub redis_url: String,
    /// Server port settings.
    pub server: ServerSettings,
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is
    /// out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is
    /// out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let mode = match env.get("PIPELINE_MODE") {
            Some(raw) => Mode::from_str_case_insensitive(&raw)
                .ok_or_else(|| ConfigError::invalid("PIPELINE_MODE", &raw))?,
            None => Mode::default(),
        };

        let symbols = parse_symbols(&env.required("TRADING_SYMBOLS")?);
        if symbols.is_empty() {
            return Err(ConfigError::EmptyValue("TRADING_SYMBOLS".to_string()));
        }

        let fallback_symbol = env
            .get("FALLBACK_SYMBOL")
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "AAPL".to_string());

        let feed = Self::feed_settings(&env, mode)?;
        let replay = Self::replay_endpoint(&env, &symbols)?;

        let mut database = DatabaseSettings::new(env.required("DATABASE_URL")?);
        database.min_connections = env.parse_or("DB_POOL_MIN", database.min_connections);
        database.max_connections = env.parse_or("DB_POOL_MAX", database.max_connections);
        database.acquire_timeout = env.secs_or("DB_ACQUIRE_TIMEOUT_SECS", database.acquire_timeout);
        if database.min_connections > database.max_connections {
            return Err(ConfigError::InvalidValue {
                key: "DB_POOL_MIN".to_string(),
                reason: format!(
                    "{} exceeds DB_POOL_MAX {}",
                    database.min_connections, database.max_connections
                ),
            });
        }

        let redis_url = env
            .get("REDIS_URL")
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let server = ServerSettings {
            health_port: env.parse_or("PIPELINE_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            mode,
            symbols,
            fallback_symbol,
            feed,
            replay,
            database,
            redis_url,
            server,
        })
    }

    fn feed_settings<F>(env: &Env<F>, mode: Mode) -> Result<FeedSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let feed = env
            .get("ALPACA_FEED")
            .map(|s| DataFeed::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let credentials = match mode {
            Mode::Live => {
                let key = env.required("ALPACA_KEY")?;
                let secret = env.required("ALPACA_SECRET")?;
                Some(
                    Credentials::new(key, secret)
                        .map_err(|e| ConfigError::invalid("ALPACA_KEY", &e.to_string()))?,
                )
            }
            Mode::Replay => None,
        };

        let flush_data_source = match env.get("FLUSH_DATA_SOURCE") {
            Some(raw) => DataSource::from_str(&raw)
                .map_err(|_| ConfigError::invalid("FLUSH_DATA_SOURCE", &raw))?,
            None => DataSource::default(),
        };

        Ok(FeedSettings {
            feed,
            stream_url: env
                .get("ALPACA_STREAM_URL")
                .unwrap_or_else(|| FeedClientConfig::stream_url(feed.as_str())),
            trading_url: env
                .get("ALPACA_TRADING_URL")
                .unwrap_or_else(|| PAPER_TRADING_URL.to_string()),
            credentials,
            flush_interval: env.secs_or("FLUSH_INTERVAL_SECS", Duration::from_secs(3600)),
            flush_data_source,
            recv_timeout: env.millis_or("FEED_RECV_TIMEOUT_MS", Duration::from_secs(1)),
        })
    }

    fn replay_endpoint<F>(env: &Env<F>, symbols: &[String]) -> Result<ReplayEndpoint, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ReplayPlan::default();

        let mode = match env.get("REPLAY_MODE") {
            Some(raw) => ReplayMode::from_str_case_insensitive(&raw)
                .ok_or_else(|| ConfigError::invalid("REPLAY_MODE", &raw))?,
            None => defaults.mode,
        };

        let speed = env.parse_or("REPLAY_SPEED", defaults.speed);
        let paced = ReplayPlan {
            speed,
            ..ReplayPlan::default()
        };
        if paced.checked_frame_delay().is_none() {
            return Err(ConfigError::invalid("REPLAY_SPEED", &speed.to_string()));
        }

        let replay_symbols = env
            .get("REPLAY_SYMBOLS")
            .map(|raw| parse_symbols(&raw))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| symbols.to_vec());

        Ok(ReplayEndpoint {
            host: env.get("REPLAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.parse_or("REPLAY_PORT", 8765),
            symbols: replay_symbols,
            plan: ReplayPlan {
                mode,
                speed,
                loop_count: env.parse_or("REPLAY_LOOP_COUNT", defaults.loop_count),
                loop_pause: env.millis_or("REPLAY_LOOP_PAUSE_MS", defaults.loop_pause),
            },
        })
    }

    /// Credentials for the live feed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when none were configured.
    pub fn credentials(&self) -> Result<&Credentials, ConfigError> {
        self.feed
            .credentials
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("ALPACA_KEY".to_string()))
    }

    /// Settings handed to the replay server.
    #[must_use]
    pub fn replay_settings(&self) -> ReplaySettings {
        ReplaySettings {
            plan: self.replay.plan,
            symbols: self.replay.symbols.clone(),
            fallback: self.fallback_symbol.clone(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable holds an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: format!("unsupported value {value:?}"),
        }
    }
}

/// Comma-separated symbols, trimmed, upper-cased, first occurrence kept.
fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const LIVE: &[(&str, &str)] = &[
        ("TRADING_SYMBOLS", "AAPL, msft,AAPL"),
        ("ALPACA_KEY", "key"),
        ("ALPACA_SECRET", "secret"),
        ("DATABASE_URL", "postgres://localhost/bars"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut vars = LIVE.to_vec();
        vars.extend_from_slice(extra);
        vars
    }

    #[test]
    fn live_defaults() {
        let config = load(LIVE).unwrap();

        assert_eq!(config.mode, Mode::Live);
        assert_eq!(config.symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(config.fallback_symbol, "AAPL");
        assert_eq!(config.feed.feed, DataFeed::Iex);
        assert_eq!(config.feed.stream_url, "wss://stream.data.alpaca.markets/v2/iex");
        assert_eq!(config.feed.trading_url, PAPER_TRADING_URL);
        assert_eq!(config.feed.flush_interval, Duration::from_secs(3600));
        assert_eq!(config.feed.flush_data_source, DataSource::Live);
        assert_eq!(config.feed.recv_timeout, Duration::from_secs(1));
        assert_eq!(config.replay.bind_addr(), "0.0.0.0:8765");
        assert_eq!(config.replay.symbols, config.symbols);
        assert_eq!(config.replay.plan, ReplayPlan::default());
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.credentials().unwrap().key(), "key");
    }

    #[test]
    fn replay_mode_needs_no_credentials() {
        let config = load(&[
            ("PIPELINE_MODE", "Replay"),
            ("TRADING_SYMBOLS", "AAPL,PDFS"),
            ("DATABASE_URL", "postgres://localhost/bars"),
            ("REPLAY_MODE", "loop"),
            ("REPLAY_SPEED", "4"),
            ("REPLAY_LOOP_COUNT", "3"),
            ("REPLAY_LOOP_PAUSE_MS", "250"),
            ("REPLAY_SYMBOLS", "pdfs"),
        ])
        .unwrap();

        assert_eq!(config.mode, Mode::Replay);
        assert!(config.credentials().is_err());
        let settings = config.replay_settings();
        assert_eq!(settings.symbols, vec!["PDFS"]);
        assert_eq!(settings.plan.mode, ReplayMode::Loop);
        assert_eq!(settings.plan.loop_count, 3);
        assert_eq!(settings.plan.loop_pause, Duration::from_millis(250));
        assert_eq!(settings.plan.frame_delay(), Duration::from_millis(250));
    }

    #[test]
    fn missing_symbols_is_error() {
        let err = load(&[("DATABASE_URL", "postgres://localhost/bars")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "TRADING_SYMBOLS"));
    }

    #[test]
    fn blank_symbol_list_is_empty_value() {
        let mut vars = with(&[]);
        vars[0] = ("TRADING_SYMBOLS", " , ");
        assert!(matches!(load(&vars), Err(ConfigError::EmptyValue(_))));
    }

    #[test]
    fn live_mode_requires_credentials() {
        let err = load(&[
            ("TRADING_SYMBOLS", "AAPL"),
            ("DATABASE_URL", "postgres://localhost/bars"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "ALPACA_KEY"));
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        for speed in ["0", "-2", "NaN", "inf", "1e-20"] {
            let err = load(&with(&[("REPLAY_SPEED", speed)])).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "REPLAY_SPEED"));
        }
    }

    #[test]
    fn fallback_symbol_is_normalized_like_the_universe() {
        let config = load(&with(&[
            ("TRADING_SYMBOLS", "aapl,pdfs"),
            ("FALLBACK_SYMBOL", "  aapl "),
        ]))
        .unwrap();

        assert_eq!(config.symbols, vec!["AAPL", "PDFS"]);
        assert_eq!(config.fallback_symbol, "AAPL");
        assert_eq!(config.replay_settings().fallback, "AAPL");
    }

    #[test]
    fn unparseable_numbers_fall_back_to_defaults() {
        let config = load(&with(&[
            ("REPLAY_SPEED", "fast"),
            ("FLUSH_INTERVAL_SECS", "hourly"),
            ("REPLAY_PORT", "-1"),
        ]))
        .unwrap();

        assert!((config.replay.plan.speed - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.feed.flush_interval, Duration::from_secs(3600));
        assert_eq!(config.replay.port, 8765);
    }

    #[test]
    fn pool_min_above_max_is_rejected() {
        let err = load(&with(&[("DB_POOL_MIN", "8"), ("DB_POOL_MAX", "4")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DB_POOL_MIN"));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(load(&with(&[("PIPELINE_MODE", "backfill")])).is_err());
        assert!(load(&with(&[("REPLAY_MODE", "shuffle")])).is_err());
    }

    #[test]
    fn sip_feed_and_stream_override() {
        let config = load(&with(&[("ALPACA_FEED", "SIP")])).unwrap();
        assert_eq!(config.feed.stream_url, "wss://stream.data.alpaca.markets/v2/sip");

        let config = load(&with(&[("ALPACA_STREAM_URL", "ws://127.0.0.1:9000")])).unwrap();
        assert_eq!(config.feed.stream_url, "ws://127.0.0.1:9000");
    }

    #[test]
    fn recycled_data_source() {
        let config = load(&with(&[("FLUSH_DATA_SOURCE", "recycled")])).unwrap();
        assert_eq!(config.feed.flush_data_source, DataSource::Recycled);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(Mode::from_str_case_insensitive("LIVE"), Some(Mode::Live));
        assert_eq!(Mode::from_str_case_insensitive(" replay "), Some(Mode::Replay));
        assert_eq!(Mode::from_str_case_insensitive("paper"), None);
    }
}
