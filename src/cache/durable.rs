//! Durable tier: SQLite-backed persistent cache rows.
//!
//! The store is opened lazily on first use and the pool is memoized for the
//! rest of the process, including a failed open: once opening fails the tier
//! stays unavailable and every call returns [`DurableError::Unavailable`].
//!
//! Rows carry absolute `expires_at` timestamps (unix millis). The sweep index
//! is ordered by `expires_at`, so `cleanup` is a range delete over the index
//! rather than a full scan.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use super::clock::{Clock, from_unix_millis, unix_millis};
use super::config::CacheConfig;
use super::entry::{CacheEntry, expiry_after};
use super::error::DurableError;
use super::keys::CacheKey;
use super::resource::Resource;

const METRIC_DURABLE_EXPIRED: &str = "tiercache_durable_expired_total";
const ZSTD_LEVEL: i32 = 3;

/// Lifecycle of the underlying store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableState {
    /// Not opened yet; the next call opens it.
    Unopened,
    Ready,
    /// Opening failed; the tier misses and drops writes for the process lifetime.
    Unavailable,
}

pub struct DurableTier {
    path: PathBuf,
    max_connections: u32,
    busy_timeout: Duration,
    compress_threshold: usize,
    clock: Arc<dyn Clock>,
    pool: OnceCell<Option<SqlitePool>>,
}

impl DurableTier {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: config.durable_path.clone(),
            max_connections: config.durable_max_connections_non_zero(),
            busy_timeout: config.durable_busy_timeout(),
            compress_threshold: config.compress_threshold_bytes,
            clock,
            pool: OnceCell::new(),
        }
    }

    /// Open the store if needed. Concurrent callers share one open attempt.
    ///
    /// Returns whether the tier is usable.
    pub async fn init(&self) -> bool {
        self.pool().await.is_ok()
    }

    pub fn state(&self) -> DurableState {
        match self.pool.get() {
            None => DurableState::Unopened,
            Some(Some(_)) => DurableState::Ready,
            Some(None) => DurableState::Unavailable,
        }
    }

    async fn pool(&self) -> Result<&SqlitePool, DurableError> {
        self.pool
            .get_or_init(|| async {
                match self.open().await {
                    Ok(pool) => {
                        info!(path = %self.path.display(), "Durable cache tier opened");
                        Some(pool)
                    }
                    Err(err) => {
                        error!(
                            path = %self.path.display(),
                            error = %err,
                            "Durable cache tier unavailable; continuing with fast tier only"
                        );
                        None
                    }
                }
            })
            .await
            .as_ref()
            .ok_or(DurableError::Unavailable)
    }

    async fn open(&self) -> Result<SqlitePool, DurableError> {
        if let Some(parent) = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(pool)
    }

    /// Write or overwrite the row for `key`, expiring `ttl` from now.
    pub async fn set(
        &self,
        key: &CacheKey,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), DurableError> {
        let pool = self.pool().await?;
        let written_at = self.clock.now();
        let expires_at = expiry_after(written_at, ttl);
        let (stored, compressed) = self.encode(payload)?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (key, resource, value, written_at, expires_at, estimated_size, compressed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                resource = excluded.resource,
                value = excluded.value,
                written_at = excluded.written_at,
                expires_at = excluded.expires_at,
                estimated_size = excluded.estimated_size,
                compressed = excluded.compressed
            "#,
        )
        .bind(key.storage_key())
        .bind(key.resource().as_str())
        .bind(stored)
        .bind(unix_millis(written_at))
        .bind(unix_millis(expires_at))
        .bind(payload.len() as i64)
        .bind(compressed)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Read the row for `key`.
    ///
    /// An expired row is deleted on the way out and reported as a miss. The
    /// delete is conditioned on the expiry it observed, so an overwrite that
    /// raced in between is left alone.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry<Vec<u8>>>, DurableError> {
        let pool = self.pool().await?;
        let storage_key = key.storage_key();

        let Some(row) = sqlx::query(
            r#"
            SELECT value, written_at, expires_at, estimated_size, compressed
            FROM cache_entries
            WHERE key = ?
            "#,
        )
        .bind(storage_key.as_str())
        .fetch_optional(pool)
        .await?
        else {
            return Ok(None);
        };

        let expires_at: i64 = row.try_get("expires_at")?;
        let written_at: i64 = row.try_get("written_at")?;
        let estimated_size: i64 = row.try_get("estimated_size")?;
        let mut entry = CacheEntry {
            value: row.try_get::<Vec<u8>, _>("value")?,
            written_at: from_unix_millis(written_at),
            expires_at: from_unix_millis(expires_at),
            estimated_size: usize::try_from(estimated_size).unwrap_or_default(),
            compressed: row.try_get("compressed")?,
        };

        if entry.is_expired_at(self.clock.now()) {
            sqlx::query("DELETE FROM cache_entries WHERE key = ? AND expires_at = ?")
                .bind(storage_key.as_str())
                .bind(expires_at)
                .execute(pool)
                .await?;
            counter!(METRIC_DURABLE_EXPIRED, "path" => "read").increment(1);
            debug!(key = %key, "Durable entry expired at read");
            return Ok(None);
        }

        if entry.compressed {
            entry.value = decompress(&entry.value)?;
        }
        Ok(Some(entry))
    }

    /// Remove the row for `key`. Returns whether a row existed.
    pub async fn delete(&self, key: &CacheKey) -> Result<bool, DurableError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key.storage_key())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every row of one resource.
    pub async fn delete_resource(&self, resource: Resource) -> Result<u64, DurableError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM cache_entries WHERE resource = ?")
            .bind(resource.as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear(&self) -> Result<u64, DurableError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every expired row. Returns the number removed.
    pub async fn cleanup(&self) -> Result<u64, DurableError> {
        let pool = self.pool().await?;
        let now = unix_millis(self.clock.now());
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await?;
        let removed = result.rows_affected();
        counter!(METRIC_DURABLE_EXPIRED, "path" => "sweep").increment(removed);
        Ok(removed)
    }

    /// Number of stored rows, expired or not.
    pub async fn count(&self) -> Result<u64, DurableError> {
        let pool = self.pool().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Whether a row is physically present, ignoring expiry.
    pub async fn row_exists(&self, key: &CacheKey) -> Result<bool, DurableError> {
        let pool = self.pool().await?;
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM cache_entries WHERE key = ?")
            .bind(key.storage_key())
            .fetch_optional(pool)
            .await?;
        Ok(found.is_some())
    }

    /// Close the pool if it was opened.
    pub async fn close(&self) {
        if let Some(Some(pool)) = self.pool.get() {
            pool.close().await;
        }
    }

    fn encode(&self, payload: &[u8]) -> Result<(Vec<u8>, bool), DurableError> {
        if payload.len() <= self.compress_threshold {
            return Ok((payload.to_vec(), false));
        }
        zstd::bulk::compress(payload, ZSTD_LEVEL)
            .map(|compressed| (compressed, true))
            .map_err(|err| DurableError::codec(format!("zstd compress: {err}")))
    }
}

fn decompress(stored: &[u8]) -> Result<Vec<u8>, DurableError> {
    zstd::stream::decode_all(stored)
        .map_err(|err| DurableError::codec(format!("zstd decompress: {err}")))
}
