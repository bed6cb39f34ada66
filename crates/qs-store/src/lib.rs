//! Bounded time-series store for queue-length samples
//!
//! A single SQLite table of `(unix_secs, q_len)` rows, kept to the active
//! evaluation window by pruning on every write. The sampler loop is the
//! only writer; the decision loop only reads aggregates through
//! [`MetricStore::summarize`]. A single-connection pool serializes all
//! store operations and keeps `:memory:` databases on one connection.

use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use thiserror::Error;
use tracing::debug;

use qs_common::QueueMetrics;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("missing directory and/or filename for the metrics database")]
    MissingPath,

    #[error("valid directory name is required, got '{0}'")]
    InvalidDirectory(String),

    #[error("invalid database filename '{0}'")]
    InvalidFilename(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

const MEMORY_DB: &str = ":memory:";

/// Resolve the statistics database location.
///
/// `:memory:` (case-insensitive) passes through untouched; otherwise the
/// directory must exist and the joined path must be an existing or
/// creatable file.
pub fn db_path(dir: &str, file: &str) -> Result<String> {
    if file.eq_ignore_ascii_case(MEMORY_DB) {
        return Ok(file.to_string());
    }
    if dir.is_empty() || file.is_empty() {
        return Err(StoreError::MissingPath);
    }
    let meta = std::fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(StoreError::InvalidDirectory(dir.to_string()));
    }
    let path = Path::new(dir).join(file);
    if !is_usable_file(&path) {
        return Err(StoreError::InvalidFilename(path.display().to_string()));
    }
    Ok(path.to_string_lossy().into_owned())
}

fn is_usable_file(path: &Path) -> bool {
    if path.exists() {
        return true;
    }
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(path);
            true
        }
        Err(_) => false,
    }
}

/// Ordered collection of timestamped queue-length samples.
#[derive(Clone)]
pub struct MetricStore {
    pool: Pool<Sqlite>,
}

impl MetricStore {
    /// Open the store at `path` (a filename from [`db_path`] or `:memory:`).
    pub async fn connect(path: &str) -> Result<Self> {
        let options = if path.eq_ignore_ascii_case(MEMORY_DB) {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // One connection, never recycled: serializes writers against
        // readers and pins in-memory databases to a live connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create the sample table. Idempotent.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS timeline (
                unix_secs INTEGER NOT NULL,
                q_len INTEGER NOT NULL DEFAULT (0)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_timeline_secs ON timeline (unix_secs)",
        )
        .execute(&self.pool)
        .await?;

        debug!("metric store schema initialized");
        Ok(())
    }

    /// Append one sample, timestamped with the wall clock at commit time.
    pub async fn record_sample(&self, queue_len: i64) -> Result<()> {
        sqlx::query("INSERT INTO timeline (unix_secs, q_len) VALUES (?, ?)")
            .bind(Utc::now().timestamp())
            .bind(queue_len)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete all samples older than `window` seconds.
    pub async fn prune_older_than(&self, window: i64) -> Result<()> {
        sqlx::query("DELETE FROM timeline WHERE ? - unix_secs > ?")
            .bind(Utc::now().timestamp())
            .bind(window)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Prune then record, so the fresh sample is never subject to the
    /// same pass.
    pub async fn update(&self, queue_len: i64, window: i64) -> Result<()> {
        self.prune_older_than(window).await?;
        self.record_sample(queue_len).await
    }

    /// Compute count and average over the last `window` seconds, and the
    /// coverage ratio for the given sample interval. An empty window
    /// yields all zeroes.
    pub async fn summarize(&self, window: i64, sample_interval: i64) -> Result<QueueMetrics> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(COUNT(1), 0) AS cnt, COALESCE(AVG(q_len), 0.0) AS average
            FROM timeline
            WHERE ? - unix_secs <= ?
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(window)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("cnt");
        let average: f64 = row.get("average");
        let coverage = count as f64 * sample_interval as f64 / window as f64;

        Ok(QueueMetrics {
            count,
            average,
            coverage,
        })
    }
}
