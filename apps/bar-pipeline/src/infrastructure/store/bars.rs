//! PostgreSQL Bar Repository
//!
//! Durable `intraday_bars` table keyed by `(symbol, timestamp)`. Writes are
//! last-writer-wins upserts committed in a single transaction.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

use super::database::{Database, DbError};
use crate::application::ports::{BarStore, StoreError};
use crate::domain::bar::{Bar, DataSource};

/// Postgres caps a statement at 65535 bind parameters; eight per row.
const MAX_ROWS_PER_STATEMENT: usize = 5_000;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS intraday_bars (
    symbol TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    open NUMERIC NOT NULL,
    high NUMERIC NOT NULL,
    low NUMERIC NOT NULL,
    close NUMERIC NOT NULL,
    volume BIGINT NOT NULL,
    data_source TEXT NOT NULL DEFAULT 'live'
)";

const CREATE_UNIQUE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS intraday_bars_symbol_timestamp_idx \
     ON intraday_bars (symbol, timestamp)";

const INSERT_PREFIX: &str =
    "INSERT INTO intraday_bars (symbol, timestamp, open, high, low, close, volume, data_source) ";

const ON_CONFLICT: &str = " ON CONFLICT (symbol, timestamp) DO UPDATE SET \
     open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
     close = EXCLUDED.close, volume = EXCLUDED.volume, data_source = EXCLUDED.data_source";

/// [`BarStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgBarRepository {
    db: Database,
}

impl PgBarRepository {
    /// Wrap a connected [`Database`].
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the bar table and its unique index if missing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if either DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        self.db.execute_query(CREATE_TABLE).await?;
        self.db.execute_query(CREATE_UNIQUE_INDEX).await?;
        tracing::info!("intraday_bars schema ready");
        Ok(())
    }
}

fn upsert_statement(chunk: &[Bar]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(INSERT_PREFIX);
    builder.push_values(chunk, |mut row, bar| {
        row.push_bind(bar.symbol.clone())
            .push_bind(bar.timestamp)
            .push_bind(bar.open)
            .push_bind(bar.high)
            .push_bind(bar.low)
            .push_bind(bar.close)
            .push_bind(bar.volume)
            .push_bind(bar.data_source.as_str());
    });
    builder.push(ON_CONFLICT);
    builder
}

fn bar_from_row(row: &PgRow) -> Result<Bar, sqlx::Error> {
    let source: String = row.try_get("data_source")?;
    let data_source = source.parse::<DataSource>().unwrap_or_else(|_| {
        tracing::warn!(data_source = %source, "Unknown data_source in store, treating as live");
        DataSource::Live
    });

    Ok(Bar {
        symbol: row.try_get("symbol")?,
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
        open: row.try_get::<Decimal, _>("open")?,
        high: row.try_get::<Decimal, _>("high")?,
        low: row.try_get::<Decimal, _>("low")?,
        close: row.try_get::<Decimal, _>("close")?,
        volume: row.try_get("volume")?,
        data_source,
    })
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connection(msg) => Self::Connection(msg),
            DbError::Query(msg) => Self::Query(msg),
        }
    }
}

#[async_trait]
impl BarStore for PgBarRepository {
    async fn upsert_bars(&self, bars: &[Bar]) -> Result<u64, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }

        let bars = bars.to_vec();
        let affected = self
            .db
            .with_session(move |conn| {
                Box::pin(async move {
                    let mut total = 0;
                    for chunk in bars.chunks(MAX_ROWS_PER_STATEMENT) {
                        let done = upsert_statement(chunk).build().execute(&mut *conn).await?;
                        total += done.rows_affected();
                    }
                    Ok(total)
                })
            })
            .await?;

        tracing::debug!(rows = affected, "Upserted bars");
        Ok(affected)
    }

    async fn symbols_with_history(&self) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT symbol FROM intraday_bars")
            .fetch_all(self.db.pool())
            .await
            .map_err(DbError::from)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("symbol"))
            .collect::<Result<HashSet<_>, _>>()
            .map_err(|e| DbError::from(e).into())
    }

    async fn load_series(&self, symbol: &str) -> Result<Vec<Bar>, StoreError> {
        let rows = sqlx::query(
            "SELECT symbol, timestamp, open, high, low, close, volume, data_source \
             FROM intraday_bars WHERE symbol = $1 ORDER BY timestamp ASC",
        )
        .bind(symbol)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::from)?;

        rows.iter()
            .map(bar_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::from(e).into())
    }
}
