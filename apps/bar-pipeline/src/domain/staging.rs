//! Staging Entries
//!
//! A staging entry is the not-yet-committed form of a bar. Fields are kept as
//! strings exactly as they arrived on the wire so that parsing, and therefore
//! any parse failure, happens at flush time rather than on the hot receive
//! path.

use std::collections::HashMap;

use super::bar::{Bar, BarParseError, DataSource, parse_decimal, parse_timestamp, parse_volume};

// =============================================================================
// Field Names
// =============================================================================

/// Hash field holding the symbol.
pub const FIELD_SYMBOL: &str = "symbol";
/// Hash field holding the literal timestamp.
pub const FIELD_TIMESTAMP: &str = "timestamp";
/// Hash field holding the open price.
pub const FIELD_OPEN: &str = "open";
/// Hash field holding the high price.
pub const FIELD_HIGH: &str = "high";
/// Hash field holding the low price.
pub const FIELD_LOW: &str = "low";
/// Hash field holding the close price.
pub const FIELD_CLOSE: &str = "close";
/// Hash field holding the volume.
pub const FIELD_VOLUME: &str = "volume";

// =============================================================================
// Staging Entry
// =============================================================================

/// One staged bar, keyed `"{symbol}:{timestamp}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingEntry {
    /// Ticker symbol.
    pub symbol: String,
    /// Timestamp literal as received (ISO-8601 or epoch milliseconds).
    pub timestamp: String,
    /// Open price.
    pub open: String,
    /// High price.
    pub high: String,
    /// Low price.
    pub low: String,
    /// Close price.
    pub close: String,
    /// Volume.
    pub volume: String,
}

impl StagingEntry {
    /// Key prefix matching every entry of `symbol`.
    #[must_use]
    pub fn prefix(symbol: &str) -> String {
        format!("{symbol}:")
    }

    /// Storage key of this entry.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.symbol, self.timestamp)
    }

    /// Field/value pairs for a hash write.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_SYMBOL, self.symbol.clone()),
            (FIELD_TIMESTAMP, self.timestamp.clone()),
            (FIELD_OPEN, self.open.clone()),
            (FIELD_HIGH, self.high.clone()),
            (FIELD_LOW, self.low.clone()),
            (FIELD_CLOSE, self.close.clone()),
            (FIELD_VOLUME, self.volume.clone()),
        ]
    }

    /// Rebuild an entry from a hash read.
    ///
    /// # Errors
    ///
    /// Returns [`BarParseError::MissingField`] naming the first absent field.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, BarParseError> {
        let get = |name: &'static str| {
            fields
                .get(name)
                .cloned()
                .ok_or(BarParseError::MissingField(name))
        };

        Ok(Self {
            symbol: get(FIELD_SYMBOL)?,
            timestamp: get(FIELD_TIMESTAMP)?,
            open: get(FIELD_OPEN)?,
            high: get(FIELD_HIGH)?,
            low: get(FIELD_LOW)?,
            close: get(FIELD_CLOSE)?,
            volume: get(FIELD_VOLUME)?,
        })
    }

    /// Parse into a durable bar tagged with `data_source`.
    ///
    /// # Errors
    ///
    /// Returns the first field that fails to parse.
    pub fn to_bar(&self, data_source: DataSource) -> Result<Bar, BarParseError> {
        Ok(Bar {
            symbol: self.symbol.clone(),
            timestamp: parse_timestamp(&self.timestamp)?,
            open: parse_decimal(FIELD_OPEN, &self.open)?,
            high: parse_decimal(FIELD_HIGH, &self.high)?,
            low: parse_decimal(FIELD_LOW, &self.low)?,
            close: parse_decimal(FIELD_CLOSE, &self.close)?,
            volume: parse_volume(&self.volume)?,
            data_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn entry() -> StagingEntry {
        StagingEntry {
            symbol: "AAPL".to_string(),
            timestamp: "2024-03-12T14:30:00Z".to_string(),
            open: "187.1".to_string(),
            high: "187.9".to_string(),
            low: "186.8".to_string(),
            close: "187.5".to_string(),
            volume: "1200".to_string(),
        }
    }

    #[test]
    fn key_uses_literal_timestamp() {
        assert_eq!(entry().key(), "AAPL:2024-03-12T14:30:00Z");
        assert!(entry().key().starts_with(&StagingEntry::prefix("AAPL")));
    }

    #[test]
    fn fields_rebuild_the_same_entry() {
        let original = entry();
        let map: HashMap<String, String> = original
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(StagingEntry::from_fields(&map).unwrap(), original);
    }

    #[test]
    fn missing_field_is_reported() {
        let mut map: HashMap<String, String> = entry()
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        map.remove(FIELD_VOLUME);
        assert_eq!(
            StagingEntry::from_fields(&map),
            Err(BarParseError::MissingField(FIELD_VOLUME))
        );
    }

    #[test]
    fn to_bar_parses_every_field() {
        let bar = entry().to_bar(DataSource::Recycled).unwrap();
        assert_eq!(bar.symbol, "AAPL");
        assert_eq!(bar.close, Decimal::new(1875, 1));
        assert_eq!(bar.volume, 1200);
        assert_eq!(bar.data_source, DataSource::Recycled);
    }

    #[test]
    fn to_bar_rejects_bad_price() {
        let mut bad = entry();
        bad.high = "n/a".to_string();
        assert!(matches!(
            bad.to_bar(DataSource::Live),
            Err(BarParseError::InvalidDecimal { field: FIELD_HIGH, .. })
        ));
    }
}
