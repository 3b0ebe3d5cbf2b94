//! Staging Buffer Port (Driven Port)
//!
//! Ephemeral key/value store of bars that have been received but not yet
//! committed durably. Keys are `"{symbol}:{timestamp}"`, values are flat
//! string hashes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::staging::StagingEntry;

/// Staging buffer error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StagingError {
    /// The backing store could not be reached.
    #[error("staging store unavailable: {0}")]
    Unavailable(String),

    /// A command was rejected by the backing store.
    #[error("staging command failed: {0}")]
    Command(String),
}

/// One raw staged record as read back from the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRecord {
    /// Storage key.
    pub key: String,
    /// Hash fields, possibly incomplete or malformed.
    pub fields: HashMap<String, String>,
}

/// Port for the staging buffer.
#[async_trait]
pub trait StagingBuffer: Send + Sync {
    /// Write or overwrite the entry at its key.
    async fn put(&self, entry: &StagingEntry) -> Result<(), StagingError>;

    /// Enumerate every staged record under the given symbols.
    async fn scan(&self, symbols: &[String]) -> Result<Vec<StagedRecord>, StagingError>;

    /// Remove one record.
    async fn delete(&self, key: &str) -> Result<(), StagingError>;
}

// =============================================================================
// In-Memory Implementation
// =============================================================================

/// In-memory staging buffer for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryStagingBuffer {
    entries: Mutex<BTreeMap<String, HashMap<String, String>>>,
    fail_deletes: AtomicBool,
}

impl InMemoryStagingBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw fields under `key`, bypassing entry validation.
    pub fn insert_raw(&self, key: impl Into<String>, fields: HashMap<String, String>) {
        self.entries.lock().insert(key.into(), fields);
    }

    /// Make every subsequent `delete` fail (or succeed again).
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of staged records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `key` is staged.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[async_trait]
impl StagingBuffer for InMemoryStagingBuffer {
    async fn put(&self, entry: &StagingEntry) -> Result<(), StagingError> {
        let fields = entry
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.entries.lock().insert(entry.key(), fields);
        Ok(())
    }

    async fn scan(&self, symbols: &[String]) -> Result<Vec<StagedRecord>, StagingError> {
        let entries = self.entries.lock();
        let prefixes: Vec<String> = symbols.iter().map(|s| StagingEntry::prefix(s)).collect();

        Ok(entries
            .iter()
            .filter(|(key, _)| prefixes.iter().any(|p| key.starts_with(p.as_str())))
            .map(|(key, fields)| StagedRecord {
                key: key.clone(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StagingError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StagingError::Command(format!("delete refused for {key}")));
        }
        self.entries.lock().remove(key);
        Ok(())
    }
}
