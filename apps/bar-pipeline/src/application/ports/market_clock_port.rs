//! Market Clock Port (Driven Port)
//!
//! Trading-calendar oracle that gates the live feed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current market session status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
    /// Whether the market is open now.
    pub is_open: bool,
    /// Next session open.
    pub next_open: Option<DateTime<Utc>>,
    /// Next session close.
    pub next_close: Option<DateTime<Utc>>,
}

/// Market clock error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClockError {
    /// Request could not be sent or no response arrived.
    #[error("clock request failed: {0}")]
    Request(String),

    /// The API answered with a non-success status.
    #[error("clock API returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("clock response malformed: {0}")]
    Decode(String),
}

/// Port for the market clock.
#[async_trait]
pub trait MarketClock: Send + Sync {
    /// Query the current market status.
    async fn status(&self) -> Result<MarketStatus, ClockError>;
}

// =============================================================================
// Manual Clock
// =============================================================================

/// Clock whose open/closed state is set by hand.
///
/// Used in tests and for running the feed outside a real trading session.
/// When closed, `next_open` is reported as "now" so a waiting caller polls
/// again shortly.
#[derive(Debug)]
pub struct ManualMarketClock {
    open: AtomicBool,
    queries: AtomicU64,
}

impl ManualMarketClock {
    /// Create a clock in the given state.
    #[must_use]
    pub const fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
            queries: AtomicU64::new(0),
        }
    }

    /// Flip the clock open or closed.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Number of status queries served.
    #[must_use]
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketClock for ManualMarketClock {
    async fn status(&self) -> Result<MarketStatus, ClockError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let is_open = self.open.load(Ordering::SeqCst);
        let now = Utc::now();
        Ok(MarketStatus {
            is_open,
            next_open: (!is_open).then_some(now),
            next_close: is_open.then_some(now),
        })
    }
}
