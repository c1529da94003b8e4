//! Session cache
//!
//! Short-lived per-target context snapshots. An entry exists only while its
//! conversation is active: it is written for the arbitration winner of each
//! turn, expires after the configured TTL and is deleted when a backend ends
//! the session. For dynamic targets the entry is also the only place the
//! workspace descriptor lives, so a missing entry means the conversation is
//! gone.

use async_trait::async_trait;
use sdk::errors::RouterError;
use sdk::types::SessionCacheEntry;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis_cache;

pub use memory::MemorySessionCache;
pub use redis_cache::RedisSessionCache;

/// Default entry lifetime
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(120);

/// Session cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    Connection(String),

    #[error("Corrupt cache entry for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<CacheError> for RouterError {
    fn from(err: CacheError) -> Self {
        RouterError::Cache(err.to_string())
    }
}

/// Key/value store holding per-target snapshots
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Read the snapshot for a target, `None` when absent or expired
    async fn read(&self, key: &str) -> Result<Option<SessionCacheEntry>, CacheError>;

    /// Store a snapshot, replacing any previous one
    async fn write(
        &self,
        key: &str,
        entry: &SessionCacheEntry,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Remove a snapshot. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
