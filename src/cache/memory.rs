//! In-process TTL-evicting cache backend.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheError, CacheStore};

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Option<Instant>,
}

/// Map-backed cache; entries past their TTL evict lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(stored) => {
                    let stale = stored
                        .expires_at
                        .is_some_and(|deadline| Instant::now() >= deadline);
                    if !stale {
                        return Ok(Some(stored.entry.clone()));
                    }
                }
            }
        }

        // Stale: drop the read guard and evict.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        entry: CacheEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let stored = StoredEntry {
            entry,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), stored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedElement;
    use crate::pipeline::ImageMeta;
    use bytes::Bytes;
    use chrono::Utc;

    fn entry(payload: &'static [u8]) -> CacheEntry {
        CacheEntry {
            element: CachedElement::new(
                Bytes::from_static(payload),
                "png".to_string(),
                ImageMeta {
                    width: 1,
                    height: 1,
                    source_type: "png".to_string(),
                    mime: "image/png".to_string(),
                },
            ),
            timestamp: Utc::now(),
            expiry: Some(300),
        }
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let cache = MemoryCache::new();
        cache.set("k", entry(b"data"), None).await.unwrap();
        let hit = cache.get("k").await.unwrap().unwrap();
        assert_eq!(hit.element.bytes(), Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn test_miss() {
        let cache = MemoryCache::new();
        assert!(cache.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_eviction() {
        let cache = MemoryCache::new();
        cache
            .set("k", entry(b"data"), Some(Duration::from_millis(0)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
