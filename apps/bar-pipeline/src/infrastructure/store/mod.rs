//! Durable Bar Store (PostgreSQL)
//!
//! - `database`: bounded pool, scoped sessions, one-shot query executor
//! - `bars`: the `intraday_bars` repository

pub mod bars;
pub mod database;

pub use bars::PgBarRepository;
pub use database::{Database, DatabaseSettings, DbError, QueryOutcome};
