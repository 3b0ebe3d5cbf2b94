//! Flush Idempotence Integration Tests
//!
//! Repeated flush cycles over the in-memory adapters: re-staged bars,
//! failed deletes after commit, and overwrites of an existing row.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use rust_decimal::Decimal;

use bar_pipeline::{
    BarStore, DataSource, InMemoryBarStore, InMemoryStagingBuffer, PersistenceFlusher,
    StagingBuffer, StagingEntry,
};

fn entry(timestamp: &str, close: &str) -> StagingEntry {
    StagingEntry {
        symbol: "AAPL".to_string(),
        timestamp: timestamp.to_string(),
        open: "187.10".to_string(),
        high: "187.50".to_string(),
        low: "186.90".to_string(),
        close: close.to_string(),
        volume: "1200".to_string(),
    }
}

fn pipeline(
    data_source: DataSource,
) -> (Arc<InMemoryStagingBuffer>, Arc<InMemoryBarStore>, PersistenceFlusher) {
    let staging = Arc::new(InMemoryStagingBuffer::new());
    let store = Arc::new(InMemoryBarStore::new());
    let flusher = PersistenceFlusher::new(
        staging.clone(),
        store.clone(),
        vec!["AAPL".to_string()],
        data_source,
    );
    (staging, store, flusher)
}

#[tokio::test]
async fn restaged_bar_is_stored_once() {
    let (staging, store, flusher) = pipeline(DataSource::Live);

    staging.put(&entry("2024-03-12T14:30:00Z", "187.25")).await.unwrap();
    flusher.flush().await.unwrap();
    staging.put(&entry("2024-03-12T14:30:00Z", "187.25")).await.unwrap();
    flusher.flush().await.unwrap();

    assert_eq!(store.len(), 1);
    assert!(staging.is_empty());
}

#[tokio::test]
async fn failed_delete_is_absorbed_by_next_flush() {
    let (staging, store, flusher) = pipeline(DataSource::Live);
    staging.put(&entry("2024-03-12T14:30:00Z", "187.25")).await.unwrap();
    staging.put(&entry("2024-03-12T14:31:00Z", "187.40")).await.unwrap();

    staging.set_fail_deletes(true);
    let first = flusher.flush().await.unwrap();
    assert_eq!(first.committed, 2);
    assert_eq!(first.deleted, 0);
    assert_eq!(first.delete_failures, 2);
    assert_eq!(staging.len(), 2);
    assert_eq!(store.len(), 2);

    staging.set_fail_deletes(false);
    let second = flusher.flush().await.unwrap();
    assert_eq!(second.committed, 2);
    assert_eq!(second.deleted, 2);
    assert_eq!(store.len(), 2);
    assert!(staging.is_empty());
}

#[tokio::test]
async fn later_flush_overwrites_existing_row() {
    let (staging, store, flusher) = pipeline(DataSource::Live);

    staging.put(&entry("2024-03-12T14:30:00Z", "187.25")).await.unwrap();
    flusher.flush().await.unwrap();
    staging.put(&entry("2024-03-12T14:30:00Z", "187.90")).await.unwrap();
    flusher.flush().await.unwrap();

    let series = store.load_series("AAPL").await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].close, Decimal::new(18790, 2));
}

#[tokio::test]
async fn flushed_rows_carry_configured_source() {
    let (staging, store, flusher) = pipeline(DataSource::Recycled);

    staging.put(&entry("2024-03-12T14:30:00Z", "187.25")).await.unwrap();
    flusher.flush().await.unwrap();

    let stored = store.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].data_source, DataSource::Recycled);
}

#[tokio::test]
async fn commit_failure_then_recovery_keeps_single_row() {
    let (staging, store, flusher) = pipeline(DataSource::Live);
    staging.put(&entry("2024-03-12T14:30:00Z", "187.25")).await.unwrap();

    store.set_fail_writes(true);
    assert!(flusher.flush().await.is_err());
    assert!(flusher.flush().await.is_err());
    assert_eq!(staging.len(), 1);
    assert!(store.is_empty());

    store.set_fail_writes(false);
    flusher.flush().await.unwrap();
    assert_eq!(store.len(), 1);
    assert!(staging.is_empty());
}
