//! Bar Store Port (Driven Port)
//!
//! Durable storage of committed bars, unique on (symbol, timestamp).

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::bar::Bar;

/// Durable store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or a connection could not be checked out.
    #[error("store connection error: {0}")]
    Connection(String),

    /// A statement failed; the enclosing transaction was rolled back.
    #[error("store query error: {0}")]
    Query(String),
}

/// Port for durable bar storage.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Insert-or-update every bar in one transaction. Returns rows affected.
    async fn upsert_bars(&self, bars: &[Bar]) -> Result<u64, StoreError>;

    /// Symbols with at least one stored bar.
    async fn symbols_with_history(&self) -> Result<HashSet<String>, StoreError>;

    /// Full series for `symbol`, ascending by timestamp.
    async fn load_series(&self, symbol: &str) -> Result<Vec<Bar>, StoreError>;
}

// =============================================================================
// In-Memory Implementation
// =============================================================================

/// In-memory bar store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryBarStore {
    rows: Mutex<BTreeMap<(String, DateTime<Utc>), Bar>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryBarStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `bars`.
    #[must_use]
    pub fn with_bars(bars: impl IntoIterator<Item = Bar>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.lock();
            for bar in bars {
                rows.insert(bar.key(), bar);
            }
        }
        store
    }

    /// Make every subsequent upsert fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Snapshot of every stored row in key order.
    #[must_use]
    pub fn all(&self) -> Vec<Bar> {
        self.rows.lock().values().cloned().collect()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BarStore for InMemoryBarStore {
    async fn upsert_bars(&self, bars: &[Bar]) -> Result<u64, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Query("write refused".to_string()));
        }
        let mut rows = self.rows.lock();
        for bar in bars {
            rows.insert(bar.key(), bar.clone());
        }
        drop(rows);
        Ok(bars.len() as u64)
    }

    async fn symbols_with_history(&self) -> Result<HashSet<String>, StoreError> {
        self.check_reads()?;
        Ok(self.rows.lock().keys().map(|(s, _)| s.clone()).collect())
    }

    async fn load_series(&self, symbol: &str) -> Result<Vec<Bar>, StoreError> {
        self.check_reads()?;
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|bar| bar.symbol == symbol)
            .cloned()
            .collect())
    }
}
