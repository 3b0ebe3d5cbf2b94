//! Alpaca Market Clock
//!
//! Queries `GET {trading_url}/v2/clock` to learn whether the market is open.
//!
//! # Wire Format (JSON)
//! ```json
//! {
//!   "timestamp": "2024-03-12T10:30:00.123-04:00",
//!   "is_open": true,
//!   "next_open": "2024-03-13T09:30:00-04:00",
//!   "next_close": "2024-03-12T16:00:00-04:00"
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::auth::Credentials;
use crate::application::ports::{ClockError, MarketClock, MarketStatus};

/// Default paper trading API base URL.
pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ClockResponse {
    is_open: bool,
    #[serde(default)]
    next_open: Option<DateTime<Utc>>,
    #[serde(default)]
    next_close: Option<DateTime<Utc>>,
}

/// Market clock backed by the Alpaca trading API.
#[derive(Debug, Clone)]
pub struct AlpacaClock {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl AlpacaClock {
    /// Create a clock client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, ClockError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClockError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }
}

#[async_trait]
impl MarketClock for AlpacaClock {
    async fn status(&self) -> Result<MarketStatus, ClockError> {
        let url = format!("{}/v2/clock", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", self.credentials.key())
            .header("APCA-API-SECRET-KEY", self.credentials.secret())
            .send()
            .await
            .map_err(|e| ClockError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClockError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(ClockError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let clock: ClockResponse =
            serde_json::from_str(&body).map_err(|e| ClockError::Decode(e.to_string()))?;

        Ok(MarketStatus {
            is_open: clock.is_open,
            next_open: clock.next_open,
            next_close: clock.next_close,
        })
    }
}
