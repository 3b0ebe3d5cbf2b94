//! Bar Domain Types
//!
//! A `Bar` is one OHLCV record for a symbol at a timestamp. The pair
//! (symbol, timestamp) is the identity of a bar: a later write with the same
//! key replaces the OHLCV fields and never produces a duplicate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while turning raw field values into a [`Bar`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarParseError {
    /// A required field was absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The timestamp was neither ISO-8601 nor epoch milliseconds.
    #[error("unparseable timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// A price field was not a decimal number.
    #[error("invalid decimal in field {field}: {value:?}")]
    InvalidDecimal {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// The volume was not an integer.
    #[error("invalid volume: {0:?}")]
    InvalidVolume(String),

    /// The data source tag was not recognised.
    #[error("unknown data source: {0:?}")]
    UnknownDataSource(String),
}

// =============================================================================
// Data Source
// =============================================================================

/// Provenance tag stored alongside every durable bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Received from the live broker feed.
    #[default]
    Live,
    /// Re-ingested from replayed or copied history.
    Recycled,
}

impl DataSource {
    /// Column value used in the durable store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Recycled => "recycled",
        }
    }
}

impl FromStr for DataSource {
    type Err = BarParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "recycled" => Ok(Self::Recycled),
            other => Err(BarParseError::UnknownDataSource(other.to_string())),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Bar
// =============================================================================

/// One OHLCV price record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Ticker symbol.
    pub symbol: String,
    /// Bar start time.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: i64,
    /// Provenance tag.
    pub data_source: DataSource,
}

impl Bar {
    /// Uniqueness key of this bar.
    #[must_use]
    pub fn key(&self) -> (String, DateTime<Utc>) {
        (self.symbol.clone(), self.timestamp)
    }

    /// Copy of this bar carrying another symbol name and timestamp.
    ///
    /// Used by replay to serve a resolved series under the requested name,
    /// stamped with wall-clock time.
    #[must_use]
    pub fn relabel(&self, symbol: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp,
            ..self.clone()
        }
    }
}

// =============================================================================
// Field Parsing
// =============================================================================

/// Naive ISO-8601 layouts accepted when no offset is present (read as UTC).
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a timestamp as received from the feed.
///
/// ISO-8601 is tried first (RFC 3339 with offset, then naive date-times
/// interpreted as UTC); epoch milliseconds are the fallback.
///
/// # Errors
///
/// Returns [`BarParseError::InvalidTimestamp`] if no format matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, BarParseError> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Ok(naive.and_utc());
        }
    }

    let millis = trimmed.parse::<i64>().ok().or_else(|| {
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    });

    millis
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| BarParseError::InvalidTimestamp(raw.to_string()))
}

/// Parse a decimal price field.
///
/// # Errors
///
/// Returns [`BarParseError::InvalidDecimal`] if the value is not a number.
pub fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, BarParseError> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| BarParseError::InvalidDecimal {
            field,
            value: raw.to_string(),
        })
}

/// Parse an integer volume, tolerating a zero fractional part (`"100.0"`).
///
/// # Errors
///
/// Returns [`BarParseError::InvalidVolume`] for anything else.
pub fn parse_volume(raw: &str) -> Result<i64, BarParseError> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(v);
    }
    Decimal::from_str(trimmed)
        .ok()
        .filter(|d| d.fract().is_zero())
        .and_then(|d| i64::try_from(d).ok())
        .ok_or_else(|| BarParseError::InvalidVolume(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test_case("2024-03-12T14:30:00Z" ; "rfc3339 zulu")]
    #[test_case("2024-03-12T10:30:00-04:00" ; "rfc3339 offset")]
    #[test_case("2024-03-12T14:30:00" ; "naive iso")]
    #[test_case("2024-03-12 14:30:00" ; "naive space separated")]
    #[test_case("1710253800000" ; "epoch millis")]
    #[test_case("1710253800000.0" ; "epoch millis float")]
    fn parses_supported_timestamp_formats(raw: &str) {
        let expected = Utc.with_ymd_and_hms(2024, 3, 12, 14, 30, 0).unwrap();
        assert_eq!(parse_timestamp(raw).unwrap(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("yesterday" ; "word")]
    #[test_case("2024-13-40T00:00:00Z" ; "impossible date")]
    #[test_case("NaN" ; "nan")]
    fn rejects_garbage_timestamps(raw: &str) {
        assert!(matches!(
            parse_timestamp(raw),
            Err(BarParseError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn iso_wins_over_epoch_for_fractional_seconds() {
        let parsed = parse_timestamp("2024-03-12T14:30:00.123456Z").unwrap();
        assert_eq!(parsed.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn decimal_parsing() {
        assert_eq!(parse_decimal("open", "187.42").unwrap(), Decimal::new(18742, 2));
        assert_eq!(parse_decimal("open", "1.5e2").unwrap(), Decimal::new(150, 0));
        assert!(parse_decimal("open", "abc").is_err());
    }

    #[test]
    fn volume_parsing() {
        assert_eq!(parse_volume("49378").unwrap(), 49378);
        assert_eq!(parse_volume("100.0").unwrap(), 100);
        assert!(parse_volume("100.5").is_err());
        assert!(parse_volume("").is_err());
    }

    #[test]
    fn data_source_round_trip() {
        assert_eq!("LIVE".parse::<DataSource>().unwrap(), DataSource::Live);
        assert_eq!("recycled".parse::<DataSource>().unwrap(), DataSource::Recycled);
        assert!("replayed".parse::<DataSource>().is_err());
        assert_eq!(DataSource::Recycled.to_string(), "recycled");
    }

    #[test]
    fn relabel_keeps_ohlcv() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();
        let bar = Bar {
            symbol: "AAPL".to_string(),
            timestamp: ts,
            open: Decimal::new(100, 0),
            high: Decimal::new(101, 0),
            low: Decimal::new(99, 0),
            close: Decimal::new(100, 0),
            volume: 10,
            data_source: DataSource::Live,
        };
        let now = Utc::now();
        let copy = bar.relabel("PDFS", now);
        assert_eq!(copy.symbol, "PDFS");
        assert_eq!(copy.timestamp, now);
        assert_eq!(copy.open, bar.open);
        assert_eq!(copy.volume, bar.volume);
    }
}
