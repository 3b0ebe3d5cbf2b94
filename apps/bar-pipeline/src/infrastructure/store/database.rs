//! PostgreSQL Connectivity
//!
//! A bounded [`PgPool`] plus scoped transactional sessions. Every session
//! returns its connection to the pool whether the work commits or fails.

use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Postgres, Statement, Transaction};

// =============================================================================
// Errors
// =============================================================================

/// Database connectivity errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Pool checkout, network or TLS failure.
    #[error("database connection error: {0}")]
    Connection(String),

    /// Statement preparation or execution failure.
    #[error("database query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_) => Self::Connection(err.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Pool bounds and connection target.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// `postgres://` connection URL.
    pub url: String,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// Upper bound; checkouts block once reached.
    pub max_connections: u32,
    /// How long a checkout may block before failing.
    pub acquire_timeout: Duration,
}

impl DatabaseSettings {
    /// Settings with the default pool bounds (1..=10, 30 s checkout).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
    }
}

// =============================================================================
// Query Outcome
// =============================================================================

/// Result of [`Database::execute_query`].
#[derive(Debug)]
pub enum QueryOutcome {
    /// The statement describes result columns.
    Rows(Vec<PgRow>),
    /// The statement produced no columns; affected-row count.
    Affected(u64),
}

impl QueryOutcome {
    /// Rows returned, or an empty slice for row-less statements.
    #[must_use]
    pub fn rows(&self) -> &[PgRow] {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected(_) => &[],
        }
    }

    /// Affected-row count, or the number of rows returned.
    #[must_use]
    pub fn affected(&self) -> u64 {
        match self {
            Self::Rows(rows) => rows.len() as u64,
            Self::Affected(count) => *count,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool and establish `min_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the server cannot be reached.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DbError> {
        let pool = settings
            .pool_options()
            .connect(&settings.url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        tracing::info!(
            min = settings.min_connections,
            max = settings.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Build the pool without connecting; connections open on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the URL cannot be parsed.
    pub fn connect_lazy(settings: &DatabaseSettings) -> Result<Self, DbError> {
        let pool = settings
            .pool_options()
            .connect_lazy(&settings.url)
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `work` in a transaction. Commits on `Ok`, rolls back on `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error from `work`, or a checkout/commit failure.
    pub async fn with_session<T, F>(&self, work: F) -> Result<T, DbError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, DbError>> + Send,
    {
        let tx = self.pool.begin().await?;
        run_in_transaction(tx, work).await
    }

    /// Like [`Self::with_session`], but first clears any aborted
    /// transaction left on the physical connection.
    ///
    /// # Errors
    ///
    /// Returns the error from `work`, or a checkout/commit failure.
    pub async fn with_clean_session<T, F>(&self, work: F) -> Result<T, DbError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, DbError>> + Send,
    {
        let mut conn = self.pool.acquire().await?;

        // Outside a transaction Postgres only emits a notice.
        if let Err(e) = (&mut *conn).execute("ROLLBACK").await {
            tracing::debug!(error = %e, "Pre-session rollback failed");
        }

        let tx = sqlx::Connection::begin(&mut *conn).await?;
        run_in_transaction(tx, work).await
    }

    /// Run one auto-committed statement.
    ///
    /// Statements that describe result columns return their rows; all
    /// others return the affected-row count.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on checkout, prepare or execution failure.
    pub async fn execute_query(&self, sql: &str) -> Result<QueryOutcome, DbError> {
        let mut conn = self.pool.acquire().await?;
        let statement = (&mut *conn).prepare(sql).await?;

        if statement.columns().is_empty() {
            let done = sqlx::query(sql).execute(&mut *conn).await?;
            Ok(QueryOutcome::Affected(done.rows_affected()))
        } else {
            let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;
            Ok(QueryOutcome::Rows(rows))
        }
    }
}

async fn run_in_transaction<T, F>(mut tx: Transaction<'_, Postgres>, work: F) -> Result<T, DbError>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, DbError>>,
{
    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            Err(err)
        }
    }
}
