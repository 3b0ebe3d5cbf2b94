//! Persistence Flusher
//!
//! Moves staged bars into the durable store. One flush scans the staging
//! buffer for the configured symbols, parses every entry into a bar, commits
//! the whole batch in one upsert transaction, and only then deletes the
//! entries that were committed.
//!
//! # Failure Semantics
//!
//! - A malformed entry is skipped and logged; it stays in staging.
//! - A failed transaction rolls back and leaves staging untouched.
//! - A failed delete after commit is logged and counted. The entry is
//!   committed again on the next flush, which the upsert absorbs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::application::ports::{BarStore, StagingBuffer, StagingError, StoreError};
use crate::domain::bar::{Bar, DataSource};
use crate::domain::staging::StagingEntry;

/// Flush errors. Both leave staging unchanged.
#[derive(Debug, Error)]
pub enum FlushError {
    /// Staging could not be scanned.
    #[error("staging scan failed: {0}")]
    Scan(#[from] StagingError),

    /// The upsert transaction failed and was rolled back.
    #[error("commit failed: {0}")]
    Commit(#[from] StoreError),
}

/// Counts for one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records found in staging.
    pub scanned: usize,
    /// Distinct bars committed.
    pub committed: usize,
    /// Records skipped as malformed.
    pub skipped: usize,
    /// Staging entries removed after commit.
    pub deleted: usize,
    /// Staging deletes that failed after commit.
    pub delete_failures: usize,
}

/// Staging → durable store flusher.
pub struct PersistenceFlusher {
    staging: Arc<dyn StagingBuffer>,
    store: Arc<dyn BarStore>,
    symbols: Vec<String>,
    data_source: DataSource,
}

impl std::fmt::Debug for PersistenceFlusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceFlusher")
            .field("symbols", &self.symbols)
            .field("data_source", &self.data_source)
            .finish_non_exhaustive()
    }
}

impl PersistenceFlusher {
    /// Create a flusher for `symbols`, tagging committed rows with `data_source`.
    #[must_use]
    pub fn new(
        staging: Arc<dyn StagingBuffer>,
        store: Arc<dyn BarStore>,
        symbols: Vec<String>,
        data_source: DataSource,
    ) -> Self {
        Self {
            staging,
            store,
            symbols,
            data_source,
        }
    }

    /// Run one flush cycle.
    ///
    /// # Errors
    ///
    /// Returns [`FlushError`] if staging cannot be scanned or the commit fails.
    /// In both cases no staging entry has been deleted.
    pub async fn flush(&self) -> Result<FlushReport, FlushError> {
        let records = self.staging.scan(&self.symbols).await?;
        let mut report = FlushReport {
            scanned: records.len(),
            ..FlushReport::default()
        };

        // Colliding keys collapse to one row; which entry wins follows scan
        // order, not write order. Every contributing key is deleted.
        let mut batch: BTreeMap<(String, DateTime<Utc>), Bar> = BTreeMap::new();
        let mut contributing: Vec<String> = Vec::with_capacity(records.len());

        for record in records {
            let parsed = StagingEntry::from_fields(&record.fields)
                .and_then(|entry| entry.to_bar(self.data_source));
            match parsed {
                Ok(bar) => {
                    batch.insert(bar.key(), bar);
                    contributing.push(record.key);
                }
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(key = %record.key, error = %e, "Skipping malformed staging entry");
                }
            }
        }

        if batch.is_empty() {
            tracing::debug!(scanned = report.scanned, "Nothing to flush");
            return Ok(report);
        }

        let bars: Vec<Bar> = batch.into_values().collect();
        if let Err(e) = self.store.upsert_bars(&bars).await {
            tracing::warn!(
                error = %e,
                count = bars.len(),
                "Flush transaction rolled back, staging retained"
            );
            return Err(e.into());
        }
        report.committed = bars.len();

        for key in &contributing {
            match self.staging.delete(key).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    report.delete_failures += 1;
                    tracing::warn!(key = %key, error = %e, "Failed to delete committed staging entry");
                }
            }
        }
        tracing::info!(
            scanned = report.scanned,
            committed = report.committed,
            skipped = report.skipped,
            deleted = report.deleted,
            delete_failures = report.delete_failures,
            "Flush complete"
        );
        Ok(report)
    }
}
