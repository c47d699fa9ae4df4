use thiserror::Error;

use super::resource::Resource;

/// Errors surfaced to callers of the cache manager.
///
/// Only programmer errors escape: every storage fault degrades to a miss or
/// a dropped write instead.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot build cache key for `{resource}`: {source}")]
    Serialization {
        resource: Resource,
        #[source]
        source: serde_json::Error,
    },
}

/// Faults inside the durable tier. Logged and absorbed by the manager.
#[derive(Debug, Error)]
pub enum DurableError {
    #[error("durable tier is unavailable")]
    Unavailable,
    #[error("durable store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("durable schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("durable payload codec failed: {0}")]
    Codec(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DurableError {
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }
}
