//! Domain Layer - Core bar pipeline types.
//!
//! Pure types with no I/O: the durable bar, its staged string form, and the
//! replay session cursor.

/// OHLCV bars and field parsing.
pub mod bar;

/// Not-yet-committed bar entries.
pub mod staging;

/// Live feed lifecycle states.
pub mod feed;

/// Replay pacing and session state.
pub mod replay;
