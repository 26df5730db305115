//! Optional derivative cache behind a generic key-value interface.
//!
//! The engine only needs `get`/`set` with a TTL; backends are selected by
//! the `backend` discriminator in configuration. This build ships an
//! in-process memory backend.

mod memory;

pub use memory::MemoryCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{CacheBackend, CacheConfig};
use crate::pipeline::ImageMeta;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// The cached produce result: encoded bytes plus their format and the
/// source meta they were derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedElement {
    bytes: Vec<u8>,
    pub format: String,
    pub meta: ImageMeta,
}

impl CachedElement {
    pub fn new(bytes: Bytes, format: String, meta: ImageMeta) -> Self {
        Self {
            bytes: bytes.to_vec(),
            format,
            meta,
        }
    }

    /// Re-materializes the byte buffer; transports that flatten buffers
    /// to plain arrays stay compatible.
    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bytes)
    }
}

/// One cache entry, written only on a clean produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub element: CachedElement,
    pub timestamp: DateTime<Utc>,
    /// Source max-age in seconds at produce time.
    pub expiry: Option<u64>,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    async fn set(
        &self,
        key: &str,
        entry: CacheEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;
}

/// Builds the configured backend, or `None` when caching is disabled.
pub fn build(config: &CacheConfig) -> Option<Arc<dyn CacheStore>> {
    if !config.enabled {
        return None;
    }
    match config.backend {
        CacheBackend::Memory => Some(Arc::new(MemoryCache::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_disabled() {
        let config = CacheConfig {
            enabled: false,
            backend: CacheBackend::Memory,
        };
        assert!(build(&config).is_none());
    }

    #[test]
    fn test_build_memory() {
        let config = CacheConfig {
            enabled: true,
            backend: CacheBackend::Memory,
        };
        assert!(build(&config).is_some());
    }

    #[test]
    fn test_element_bytes_round_trip_through_serde() {
        let meta = ImageMeta {
            width: 1,
            height: 1,
            source_type: "png".to_string(),
            mime: "image/png".to_string(),
        };
        let element =
            CachedElement::new(Bytes::from_static(b"abc"), "png".to_string(), meta);
        let json = serde_json::to_string(&element).unwrap();
        let back: CachedElement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bytes(), Bytes::from_static(b"abc"));
        assert_eq!(back.format, "png");
    }
}
