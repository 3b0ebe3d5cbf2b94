//! Alpaca Bar Stream Message Types
//!
//! Wire format types for the `bars` channel of Alpaca's market data
//! WebSocket and the control frames around it. The replay server emits the
//! same bar shape, so these types are used in both directions.
//!
//! # Message Types
//!
//! ## Control Messages
//! - `Success`: connection welcome or authentication ack
//! - `Error`: error response with code and message
//! - `Subscription`: subscription confirmation
//!
//! ## Data Messages
//! - `Bar`: OHLCV minute bar (`"T":"b"`) or its correction (`"T":"u"`)
//!
//! # References
//!
//! - [Stock Streaming](https://docs.alpaca.markets/docs/real-time-stock-pricing-data)

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize, Serializer};

use crate::domain::bar::Bar;
use crate::domain::staging::StagingEntry;

// =============================================================================
// Control Messages
// =============================================================================

/// Success message indicating connection or authentication succeeded.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "success", "msg": "connected"}
/// {"T": "success", "msg": "authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Message type (always "success")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Success message: "connected" or "authenticated"
    pub msg: SuccessKind,
}

impl SuccessMessage {
    /// Build a success message.
    #[must_use]
    pub fn new(kind: SuccessKind) -> Self {
        Self {
            msg_type: "success".to_string(),
            msg: kind,
        }
    }
}

/// Kind of success message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Initial connection established
    Connected,
    /// Authentication successful
    Authenticated,
}

/// Error message with code and description.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 402, "msg": "auth failed"}
/// ```
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Message type (always "error")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Error code
    pub code: i32,

    /// Error message
    pub msg: String,
}

impl ErrorMessage {
    /// Build an error message.
    #[must_use]
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self {
            msg_type: "error".to_string(),
            code,
            msg: msg.into(),
        }
    }
}

/// Subscription confirmation message.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "subscription", "trades": [], "quotes": [], "bars": ["AAPL", "MSFT"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Message type (always "subscription")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Subscribed bar symbols
    #[serde(default)]
    pub bars: Vec<String>,
}

// =============================================================================
// Bar Messages
// =============================================================================

/// Bar timestamp exactly as it appeared on the wire.
///
/// Alpaca sends RFC 3339 strings; other producers send epoch milliseconds.
/// The literal form is kept so that staging keys match what was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// ISO-8601 / RFC 3339 text.
    Text(String),
    /// Epoch milliseconds.
    Number(serde_json::Number),
}

impl WireTimestamp {
    /// Literal timestamp string.
    #[must_use]
    pub fn literal(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

impl From<DateTime<Utc>> for WireTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Text(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

fn default_bar_type() -> String {
    "b".to_string()
}

fn serialize_volume<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    match value.fract().is_zero().then(|| value.to_i64()).flatten() {
        Some(whole) => serializer.serialize_i64(whole),
        None => rust_decimal::serde::float::serialize(value, serializer),
    }
}

/// Stock bar (OHLCV) message.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "b",
///   "S": "SPY",
///   "o": 388.985,
///   "h": 389.13,
///   "l": 388.975,
///   "c": 389.12,
///   "v": 49378,
///   "t": "2021-02-22T19:15:00Z"
/// }
/// ```
///
/// Long-form keys (`symbol`, `open`, `high`, `low`, `close`, `volume`,
/// `timestamp`) are accepted on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarMessage {
    /// Message type: "b" (minute) or "u" (updated)
    #[serde(rename = "T", default = "default_bar_type")]
    pub msg_type: String,

    /// Ticker symbol
    #[serde(rename = "S", alias = "symbol")]
    pub symbol: String,

    /// Open price
    #[serde(rename = "o", alias = "open", serialize_with = "rust_decimal::serde::float::serialize")]
    pub open: Decimal,

    /// High price
    #[serde(rename = "h", alias = "high", serialize_with = "rust_decimal::serde::float::serialize")]
    pub high: Decimal,

    /// Low price
    #[serde(rename = "l", alias = "low", serialize_with = "rust_decimal::serde::float::serialize")]
    pub low: Decimal,

    /// Close price
    #[serde(rename = "c", alias = "close", serialize_with = "rust_decimal::serde::float::serialize")]
    pub close: Decimal,

    /// Volume (shares)
    #[serde(rename = "v", alias = "volume", serialize_with = "serialize_volume")]
    pub volume: Decimal,

    /// Bar timestamp (start of bar period)
    #[serde(rename = "t", alias = "timestamp")]
    pub timestamp: WireTimestamp,
}

impl BarMessage {
    /// Staging form of this bar, keeping the literal timestamp.
    #[must_use]
    pub fn to_staging_entry(&self) -> StagingEntry {
        StagingEntry {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp.literal(),
            open: self.open.to_string(),
            high: self.high.to_string(),
            low: self.low.to_string(),
            close: self.close.to_string(),
            volume: self.volume.normalize().to_string(),
        }
    }
}

impl From<&Bar> for BarMessage {
    fn from(bar: &Bar) -> Self {
        Self {
            msg_type: default_bar_type(),
            symbol: bar.symbol.clone(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: Decimal::from(bar.volume),
            timestamp: WireTimestamp::from(bar.timestamp),
        }
    }
}

// =============================================================================
// Outbound Requests
// =============================================================================

/// Authentication request for market data streams.
///
/// # Wire Format (JSON)
/// ```json
/// {"action": "auth", "key": "...", "secret": "..."}
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Action: "auth"
    pub action: String,

    /// API key
    pub key: String,

    /// API secret
    pub secret: String,
}

impl AuthRequest {
    /// Create a new authentication request.
    #[must_use]
    pub fn new(key: String, secret: String) -> Self {
        Self {
            action: "auth".to_string(),
            key,
            secret,
        }
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("action", &self.action)
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Subscribe/unsubscribe request for the `bars` channel.
///
/// # Wire Format (JSON)
/// ```json
/// {"action": "subscribe", "bars": ["AAPL", "MSFT"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Action: "subscribe" or "unsubscribe"
    pub action: String,

    /// Bar symbols
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bars: Vec<String>,
}

impl SubscriptionRequest {
    /// Create a subscribe request.
    #[must_use]
    pub fn subscribe() -> Self {
        Self {
            action: "subscribe".to_string(),
            ..Default::default()
        }
    }

    /// Create an unsubscribe request.
    #[must_use]
    pub fn unsubscribe() -> Self {
        Self {
            action: "unsubscribe".to_string(),
            ..Default::default()
        }
    }

    /// Add bar symbols.
    #[must_use]
    pub fn with_bars(mut self, symbols: Vec<String>) -> Self {
        self.bars = symbols;
        self
    }
}

// =============================================================================
// Decoded Message Enum
// =============================================================================

/// One decoded element of a feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Connection/authentication success
    Success(SuccessMessage),

    /// Error message
    Error(ErrorMessage),

    /// Subscription confirmation
    Subscription(SubscriptionMessage),

    /// Bar update
    Bar(BarMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bar::DataSource;
    use chrono::TimeZone;

    #[test]
    fn test_deserialize_success_authenticated() {
        let json = r#"{"T":"success","msg":"authenticated"}"#;
        let msg: SuccessMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.msg, SuccessKind::Authenticated);
    }

    #[test]
    fn test_deserialize_error() {
        let json = r#"{"T":"error","code":402,"msg":"auth failed"}"#;
        let msg: ErrorMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.code, 402);
        assert_eq!(msg.msg, "auth failed");
    }

    #[test]
    fn test_deserialize_bar() {
        let json = r#"{
            "T": "b",
            "S": "SPY",
            "o": 388.985,
            "h": 389.13,
            "l": 388.975,
            "c": 389.12,
            "v": 49378,
            "n": 461,
            "vw": 389.062639,
            "t": "2021-02-22T19:15:00Z"
        }"#;
        let msg: BarMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.symbol, "SPY");
        assert_eq!(msg.open, Decimal::new(388_985, 3));
        assert_eq!(msg.volume, Decimal::from(49378));
        assert_eq!(msg.timestamp.literal(), "2021-02-22T19:15:00Z");
    }

    #[test]
    fn test_deserialize_long_form_bar_with_epoch_millis() {
        let json = r#"{
            "symbol": "AAPL",
            "open": 187.1,
            "high": 187.9,
            "low": 186.8,
            "close": 187.5,
            "volume": 1200,
            "timestamp": 1710253800000
        }"#;
        let msg: BarMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.msg_type, "b");
        assert_eq!(msg.symbol, "AAPL");
        assert_eq!(msg.timestamp.literal(), "1710253800000");
    }

    #[test]
    fn test_staging_entry_from_bar_message() {
        let json = r#"{"T":"b","S":"AAPL","o":1.5,"h":2,"l":1,"c":1.75,"v":300,"t":"2024-03-12T14:30:00Z"}"#;
        let msg: BarMessage = serde_json::from_str(json).unwrap();
        let entry = msg.to_staging_entry();
        assert_eq!(entry.key(), "AAPL:2024-03-12T14:30:00Z");
        assert_eq!(entry.volume, "300");

        let bar = entry.to_bar(DataSource::Live).unwrap();
        assert_eq!(bar.close, Decimal::new(175, 2));
    }

    #[test]
    fn test_serialize_bar_uses_numbers() {
        let bar = Bar {
            symbol: "AAPL".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 12, 14, 30, 0).unwrap(),
            open: Decimal::new(1875, 1),
            high: Decimal::new(1880, 1),
            low: Decimal::new(1870, 1),
            close: Decimal::new(1876, 1),
            volume: 1200,
            data_source: DataSource::Live,
        };
        let value = serde_json::to_value(BarMessage::from(&bar)).unwrap();
        assert_eq!(value["T"], "b");
        assert_eq!(value["S"], "AAPL");
        assert_eq!(value["o"], serde_json::json!(187.5));
        assert_eq!(value["v"], serde_json::json!(1200));
        assert_eq!(value["t"], "2024-03-12T14:30:00Z");
    }

    #[test]
    fn test_serialize_auth_request() {
        let req = AuthRequest::new("key123".to_string(), "secret456".to_string());
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""action":"auth""#));
        assert!(json.contains(r#""key":"key123""#));
        assert!(!format!("{req:?}").contains("secret456"));
    }

    #[test]
    fn test_serialize_subscription_request() {
        let req = SubscriptionRequest::subscribe()
            .with_bars(vec!["AAPL".to_string(), "MSFT".to_string()]);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"action":"subscribe","bars":["AAPL","MSFT"]}"#);

        let empty = serde_json::to_string(&SubscriptionRequest::unsubscribe()).unwrap();
        assert_eq!(empty, r#"{"action":"unsubscribe"}"#);
    }
}
