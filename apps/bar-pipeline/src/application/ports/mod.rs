//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement, each shipped with an
//! in-memory or manual implementation for tests and local runs.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StagingBuffer`: ephemeral store of not-yet-committed bars
//! - `BarStore`: durable bar storage
//! - `MarketClock`: trading-calendar oracle

mod bar_store_port;
mod market_clock_port;
mod staging_port;

pub use bar_store_port::{BarStore, InMemoryBarStore, StoreError};
pub use market_clock_port::{ClockError, ManualMarketClock, MarketClock, MarketStatus};
pub use staging_port::{InMemoryStagingBuffer, StagedRecord, StagingBuffer, StagingError};
