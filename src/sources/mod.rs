//! Source layer: pluggable suppliers resolving an image id to its bytes.
//!
//! ## Key Components
//!
//! - [`Source`] - Trait implemented by each supplier class
//! - [`SourceDescriptor`] - Metadata plus a deferred, memoized byte producer
//! - [`SourceRegistry`] - By-name registry selecting a supplier per id shape
//!
//! Ids with a URL scheme resolve through the `http` supplier, everything
//! else through `filesystem`.

mod filesystem;
mod http;

pub use filesystem::FilesystemSource;
pub use http::HttpSource;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell};

use crate::error::IpxError;
use crate::resolve::has_scheme;

pub const FILESYSTEM_SOURCE: &str = "filesystem";
pub const HTTP_SOURCE: &str = "http";

/// Per-request options forwarded to the selected supplier.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Skips the origin host allow-list for this request.
    pub bypass_domain: bool,
}

type BodyFuture = Pin<Box<dyn Future<Output = Result<Bytes, IpxError>> + Send + 'static>>;

/// Opaque value returned by a supplier for one id.
///
/// `mtime` and `max_age` are fixed at creation. The body producer runs at
/// most once; every `data()` call observes the same buffer or the same
/// failure.
pub struct SourceDescriptor {
    pub mtime: Option<DateTime<Utc>>,
    pub max_age: Option<u64>,
    body: Mutex<Option<BodyFuture>>,
    fetched: OnceCell<Result<Bytes, IpxError>>,
}

impl SourceDescriptor {
    pub fn new<F>(mtime: Option<DateTime<Utc>>, max_age: Option<u64>, body: F) -> Self
    where
        F: Future<Output = Result<Bytes, IpxError>> + Send + 'static,
    {
        Self {
            mtime,
            max_age,
            body: Mutex::new(Some(Box::pin(body))),
            fetched: OnceCell::new(),
        }
    }

    /// Deferred, memoized read of the raw source bytes.
    pub async fn data(&self) -> Result<Bytes, IpxError> {
        self.fetched
            .get_or_init(|| async {
                // The OnceCell runs this at most once, so the future is
                // still present the only time it is taken.
                let body = self.body.lock().await.take();
                match body {
                    Some(body) => body.await,
                    None => Err(IpxError::internal("source body already consumed")),
                }
            })
            .await
            .clone()
    }
}

impl std::fmt::Debug for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDescriptor")
            .field("mtime", &self.mtime)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

/// A supplier resolves an id to a source descriptor.
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    async fn resolve(
        &self,
        id: &str,
        options: &RequestOptions,
    ) -> Result<SourceDescriptor, IpxError>;
}

/// Registry mapping supplier names to instances.
///
/// Holds at most two entries; selection is by id shape, not by name
/// lookup from the request.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<&'static str, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, source: Arc<dyn Source>) {
        self.sources.insert(name, source);
    }

    /// Selects the supplier for an id: scheme-shaped ids go to `http`,
    /// everything else to `filesystem`.
    pub fn select(&self, id: &str) -> Result<Arc<dyn Source>, IpxError> {
        let name = if has_scheme(id) {
            HTTP_SOURCE
        } else {
            FILESYSTEM_SOURCE
        };
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| IpxError::bad_request("Unknown source"))
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }
}
