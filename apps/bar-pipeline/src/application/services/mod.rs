//! Application Services
//!
//! Services that orchestrate domain logic over the ports.
//!
//! - `SymbolResolver`: maps requested symbols to symbols with stored history
//! - `PersistenceFlusher`: commits staged bars and clears staging

mod flusher;
mod resolver;

pub use flusher::{FlushError, FlushReport, PersistenceFlusher};
pub use resolver::SymbolResolver;
