use super::{CacheError, SessionCache};
use async_trait::async_trait;
use redis::AsyncCommands;
use sdk::types::SessionCacheEntry;
use std::time::Duration;

/// Redis-backed session cache.
///
/// Entries are JSON documents stored with `SET key value EX ttl`, so expiry
/// is enforced by the server.
pub struct RedisSessionCache {
    client: redis::Client,
    key_prefix: String,
}

impl RedisSessionCache {
    /// Create a cache from a connection URL. No connection is made until first use.
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn read(&self, key: &str) -> Result<Option<SessionCacheEntry>, CacheError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .get(self.key(key))
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        payload
            .map(|p| {
                serde_json::from_str(&p).map_err(|e| CacheError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    async fn write(
        &self,
        key: &str,
        entry: &SessionCacheEntry,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(entry).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(self.key(key), payload, ttl.as_secs().max(1))
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_prefixed() {
        let cache = RedisSessionCache::new("redis://127.0.0.1/", "switchboard").unwrap();
        assert_eq!(cache.key("u1:weather"), "switchboard:u1:weather");

        let bare = RedisSessionCache::new("redis://127.0.0.1/", "").unwrap();
        assert_eq!(bare.key("conv-9"), "conv-9");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(RedisSessionCache::new("not a url", "x").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connection_error() {
        let cache = RedisSessionCache::new("redis://127.0.0.1:1/", "x").unwrap();
        let err = cache.read("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Connection(_)));
    }
}
