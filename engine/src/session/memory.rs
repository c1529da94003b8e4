use super::{CacheError, SessionCache};
use async_trait::async_trait;
use sdk::types::SessionCacheEntry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Slot {
    entry: SessionCacheEntry,
    ttl: Duration,
    expires_at: Instant,
}

/// In-process session cache.
///
/// Expiry is evaluated on read. Every write also sweeps expired slots, so
/// keys that are never read again do not accumulate.
#[derive(Clone, Default)]
pub struct MemorySessionCache {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL the live entry for `key` was written with
    pub async fn ttl_of(&self, key: &str) -> Option<Duration> {
        let slots = self.slots.read().await;
        slots
            .get(key)
            .filter(|s| s.expires_at > Instant::now())
            .map(|s| s.ttl)
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .read()
            .await
            .values()
            .filter(|s| s.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn read(&self, key: &str) -> Result<Option<SessionCacheEntry>, CacheError> {
        {
            let slots = self.slots.read().await;
            match slots.get(key) {
                None => return Ok(None),
                Some(slot) if slot.expires_at > Instant::now() => {
                    return Ok(Some(slot.entry.clone()))
                }
                Some(_) => {}
            }
        }

        self.slots.write().await.remove(key);
        Ok(None)
    }

    async fn write(
        &self,
        key: &str,
        entry: &SessionCacheEntry,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let slot = Slot {
            entry: entry.clone(),
            ttl,
            expires_at: now + ttl,
        };

        let mut slots = self.slots.write().await;
        slots.retain(|_, s| s.expires_at > now);
        slots.insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.slots.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{UserContext, WorkspaceDescriptor};
    use serde_json::json;

    fn entry() -> SessionCacheEntry {
        SessionCacheEntry {
            workspace: WorkspaceDescriptor {
                name: "weather".to_string(),
                workspace_id: "ws-1".to_string(),
                credential_ref: "main".to_string(),
                recursive: false,
            },
            context: UserContext::new().with("city", json!("Paris")),
        }
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let cache = MemorySessionCache::new();
        assert!(cache.read("u1:weather").await.unwrap().is_none());

        cache
            .write("u1:weather", &entry(), Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(cache.read("u1:weather").await.unwrap(), Some(entry()));
        assert_eq!(
            cache.ttl_of("u1:weather").await,
            Some(Duration::from_secs(120))
        );

        cache.delete("u1:weather").await.unwrap();
        assert!(cache.read("u1:weather").await.unwrap().is_none());
        cache.delete("u1:weather").await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemorySessionCache::new();
        cache
            .write("conv-1", &entry(), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.read("conv-1").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_write_sweeps_unread_expired_slots() {
        let cache = MemorySessionCache::new();
        for i in 0..1000 {
            cache
                .write(&format!("u{}:weather", i), &entry(), Duration::from_millis(1))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache
            .write("fresh", &entry(), Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.slots.read().await.len(), 1);
    }
}
