//! Redis Staging Buffer
//!
//! Each staged bar is a Redis hash at `"{symbol}:{timestamp}"`. Scans use
//! the cursor-based `SCAN MATCH "{symbol}:*"` so large buffers never block
//! the server the way `KEYS` would.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::application::ports::{StagedRecord, StagingBuffer, StagingError};
use crate::domain::staging::StagingEntry;

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

/// Staging buffer backed by Redis hashes.
#[derive(Clone)]
pub struct RedisStagingBuffer {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStagingBuffer").finish_non_exhaustive()
    }
}

impl RedisStagingBuffer {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, StagingError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StagingError::Unavailable(e.to_string()))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| StagingError::Unavailable(e.to_string()))?;

        tracing::info!("Connected to Redis staging buffer");
        Ok(Self { connection })
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StagingError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl StagingBuffer for RedisStagingBuffer {
    async fn put(&self, entry: &StagingEntry) -> Result<(), StagingError> {
        let mut conn = self.connection.clone();
        let fields = entry.to_fields();
        let () = conn
            .hset_multiple(entry.key(), &fields)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn scan(&self, symbols: &[String]) -> Result<Vec<StagedRecord>, StagingError> {
        let mut conn = self.connection.clone();
        let mut records = Vec::new();

        for symbol in symbols {
            let pattern = format!("{}*", escape_glob(&StagingEntry::prefix(symbol)));
            for key in self.scan_keys(&pattern).await? {
                let fields: HashMap<String, String> =
                    conn.hgetall(&key).await.map_err(command_error)?;
                // Deleted between SCAN and HGETALL.
                if fields.is_empty() {
                    continue;
                }
                records.push(StagedRecord { key, fields });
            }
        }

        tracing::debug!(count = records.len(), "Scanned staging buffer");
        Ok(records)
    }

    async fn delete(&self, key: &str) -> Result<(), StagingError> {
        let mut conn = self.connection.clone();
        let _removed: u64 = conn.del(key).await.map_err(command_error)?;
        Ok(())
    }
}

fn command_error(e: redis::RedisError) -> StagingError {
    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        StagingError::Unavailable(e.to_string())
    } else {
        StagingError::Command(e.to_string())
    }
}

/// Escape Redis glob metacharacters so a symbol matches literally.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
