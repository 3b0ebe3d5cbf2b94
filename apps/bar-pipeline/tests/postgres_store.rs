//! PostgreSQL Store Integration Tests
//!
//! Runs against the database named by `TEST_DATABASE_URL` and skips when it
//! is unset. Each test writes under its own generated symbol so runs can
//! share one database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use bar_pipeline::{Bar, BarStore, DataSource, Database, DatabaseSettings, DbError, PgBarRepository};

async fn repository() -> Option<(Database, PgBarRepository)> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let database = Database::connect(&DatabaseSettings::new(url)).await.unwrap();
    let repository = PgBarRepository::new(database.clone());
    repository.ensure_schema().await.unwrap();
    Some((database, repository))
}

fn unique_symbol() -> String {
    format!("T{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).to_uppercase()
}

fn bar(symbol: &str, minute: u32, close: i64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 12, 14, minute, 0).unwrap(),
        open: Decimal::new(18710, 2),
        high: Decimal::new(18750, 2),
        low: Decimal::new(18690, 2),
        close: Decimal::new(close, 2),
        volume: 1_200,
        data_source: DataSource::Live,
    }
}

async fn cleanup(database: &Database, symbol: &str) {
    sqlx::query("DELETE FROM intraday_bars WHERE symbol = $1")
        .bind(symbol)
        .execute(database.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn schema_setup_is_repeatable() {
    let Some((_, repository)) = repository().await else {
        return;
    };
    repository.ensure_schema().await.unwrap();
}

#[tokio::test]
async fn upsert_is_idempotent_and_overwrites() {
    let Some((database, repository)) = repository().await else {
        return;
    };
    let symbol = unique_symbol();

    repository.upsert_bars(&[bar(&symbol, 30, 18725)]).await.unwrap();
    repository.upsert_bars(&[bar(&symbol, 30, 18725)]).await.unwrap();
    let mut recycled = bar(&symbol, 30, 18790);
    recycled.data_source = DataSource::Recycled;
    repository.upsert_bars(&[recycled]).await.unwrap();

    let series = repository.load_series(&symbol).await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].close, Decimal::new(18790, 2));
    assert_eq!(series[0].data_source, DataSource::Recycled);

    cleanup(&database, &symbol).await;
}

#[tokio::test]
async fn series_loads_in_timestamp_order() {
    let Some((database, repository)) = repository().await else {
        return;
    };
    let symbol = unique_symbol();

    repository
        .upsert_bars(&[bar(&symbol, 32, 3), bar(&symbol, 30, 1), bar(&symbol, 31, 2)])
        .await
        .unwrap();

    let series = repository.load_series(&symbol).await.unwrap();
    let closes: Vec<Decimal> = series.iter().map(|b| b.close).collect();
    assert_eq!(closes, vec![Decimal::new(1, 2), Decimal::new(2, 2), Decimal::new(3, 2)]);
    assert!(repository.symbols_with_history().await.unwrap().contains(&symbol));

    cleanup(&database, &symbol).await;
}

#[tokio::test]
async fn unknown_symbol_has_empty_series() {
    let Some((_, repository)) = repository().await else {
        return;
    };
    let symbol = unique_symbol();

    assert!(repository.load_series(&symbol).await.unwrap().is_empty());
    assert!(!repository.symbols_with_history().await.unwrap().contains(&symbol));
}

#[tokio::test]
async fn failed_session_rolls_back() {
    let Some((database, repository)) = repository().await else {
        return;
    };
    let symbol = unique_symbol();

    let insert_symbol = symbol.clone();
    let result: Result<(), DbError> = database
        .with_session(move |conn| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO intraday_bars (symbol, timestamp, open, high, low, close, volume) \
                     VALUES ($1, now(), 1, 1, 1, 1, 1)",
                )
                .bind(insert_symbol)
                .execute(&mut *conn)
                .await?;
                Err(DbError::Query("abandon".to_string()))
            })
        })
        .await;

    assert!(matches!(result, Err(DbError::Query(_))));
    assert!(repository.load_series(&symbol).await.unwrap().is_empty());
}

#[tokio::test]
async fn clean_session_commits() {
    let Some((database, repository)) = repository().await else {
        return;
    };
    let symbol = unique_symbol();

    let insert_symbol = symbol.clone();
    let inserted = database
        .with_clean_session(move |conn| {
            Box::pin(async move {
                let done = sqlx::query(
                    "INSERT INTO intraday_bars (symbol, timestamp, open, high, low, close, volume) \
                     VALUES ($1, now(), 1, 1, 1, 1, 1)",
                )
                .bind(insert_symbol)
                .execute(&mut *conn)
                .await?;
                Ok(done.rows_affected())
            })
        })
        .await
        .unwrap();

    assert_eq!(inserted, 1);
    let series = repository.load_series(&symbol).await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].data_source, DataSource::Live);

    cleanup(&database, &symbol).await;
}

#[tokio::test]
async fn execute_query_distinguishes_rows_from_counts() {
    let Some((database, _)) = repository().await else {
        return;
    };
    let symbol = unique_symbol();

    let rows = database.execute_query("SELECT 41 + 1 AS answer").await.unwrap();
    assert_eq!(rows.rows().len(), 1);
    assert_eq!(rows.rows()[0].get::<i32, _>("answer"), 42);
    assert_eq!(rows.affected(), 1);

    let deleted = database
        .execute_query(&format!("DELETE FROM intraday_bars WHERE symbol = '{symbol}'"))
        .await
        .unwrap();
    assert!(deleted.rows().is_empty());
    assert_eq!(deleted.affected(), 0);
}

#[tokio::test]
async fn bad_statement_is_a_query_error() {
    let Some((database, _)) = repository().await else {
        return;
    };

    let result = database.execute_query("SELECT * FROM no_such_table_here").await;
    assert!(matches!(result, Err(DbError::Query(_))));
}
