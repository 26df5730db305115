//! Request engine: assembles a per-request image descriptor with
//! deferred, memoized `src` and `data` producers.
//!
//! ## Flow of one `data()` production:
//! 1. Cache lookup (key = JSON of id plus modifiers in insertion order)
//! 2. Source fetch through the selected supplier
//! 3. Meta sniffing, output format selection, SVG short-circuit
//! 4. Handler resolution and application (setters first)
//! 5. Encode, then optional cache write
//!
//! Each producer runs at most once per [`ImageRequest`]; all concurrent
//! callers observe the identical outcome, including failures.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::cache::{self, CacheEntry, CacheStore, CachedElement};
use crate::config::Config;
use crate::error::IpxError;
use crate::handlers::{
    self, HandlerContext, is_truthy, parse_literal,
};
use crate::pipeline::{self, ImageMeta, OutputFormat, Pipeline};
use crate::resolve::{ModifierMap, normalize_aliases, normalize_id};
use crate::sources::{
    FILESYSTEM_SOURCE, FilesystemSource, HTTP_SOURCE, HttpSource, RequestOptions,
    SourceDescriptor, SourceRegistry,
};

/// Long-lived engine context: supplier registry, alias table and the
/// optional cache handle. Created at startup, immutable thereafter.
#[derive(Clone)]
pub struct Ipx {
    registry: Arc<SourceRegistry>,
    aliases: Arc<Vec<(String, String)>>,
    cache: Option<Arc<dyn CacheStore>>,
}

impl Ipx {
    pub fn new(config: &Config) -> Result<Self, IpxError> {
        let mut registry = SourceRegistry::new();

        if let Some(dir) = &config.sources.dir {
            if !dir.as_os_str().is_empty() {
                registry.register(
                    FILESYSTEM_SOURCE,
                    Arc::new(FilesystemSource::new(dir, config.sources.max_age)),
                );
            }
        }

        if let Some(domains) = &config.sources.domains {
            registry.register(
                HTTP_SOURCE,
                Arc::new(HttpSource::new(
                    domains,
                    config.sources.max_age,
                    &config.sources.fetch,
                )?),
            );
        }

        let aliases = normalize_aliases(config.sources.alias.clone());

        Ok(Self {
            registry: Arc::new(registry),
            aliases: Arc::new(aliases),
            cache: cache::build(&config.cache),
        })
    }

    /// Builds the per-request image descriptor. The id is validated and
    /// normalized here; all fetching and processing is deferred.
    pub fn image(
        &self,
        id: &str,
        modifiers: ModifierMap,
        options: RequestOptions,
    ) -> Result<ImageRequest, IpxError> {
        if id.is_empty() || id == "/" {
            return Err(IpxError::bad_request("Resource id is missing"));
        }
        let id = normalize_id(id, &self.aliases);

        Ok(ImageRequest {
            id,
            modifiers,
            options,
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            src_cell: OnceCell::new(),
            data_cell: OnceCell::new(),
        })
    }
}

/// The processed result of one image request.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Bytes,
    /// Short format name (`png`, `jpeg`, `svg+xml`, …).
    pub format: String,
    pub meta: ImageMeta,
}

/// Per-request pair of deferred producers.
pub struct ImageRequest {
    id: String,
    modifiers: ModifierMap,
    options: RequestOptions,
    registry: Arc<SourceRegistry>,
    cache: Option<Arc<dyn CacheStore>>,
    src_cell: OnceCell<Result<Arc<SourceDescriptor>, IpxError>>,
    data_cell: OnceCell<Result<ProcessedImage, IpxError>>,
}

impl std::fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRequest")
            .field("id", &self.id)
            .field("modifiers", &self.modifiers)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ImageRequest {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deferred, memoized supplier resolution.
    pub async fn src(&self) -> Result<Arc<SourceDescriptor>, IpxError> {
        self.src_cell
            .get_or_init(|| async {
                let source = self.registry.select(&self.id)?;
                let descriptor = source.resolve(&self.id, &self.options).await?;
                Ok(Arc::new(descriptor))
            })
            .await
            .clone()
    }

    /// Deferred, memoized pipeline production.
    pub async fn data(&self) -> Result<ProcessedImage, IpxError> {
        self.data_cell.get_or_init(|| self.produce()).await.clone()
    }

    async fn produce(&self) -> Result<ProcessedImage, IpxError> {
        let cache_key = self.cache_key();

        if let Some(cache) = &self.cache {
            match cache.get(&cache_key).await {
                Ok(Some(entry)) => {
                    debug!(id = %self.id, "Serving from cache");
                    return Ok(ProcessedImage {
                        bytes: entry.element.bytes(),
                        format: entry.element.format.clone(),
                        meta: entry.element.meta.clone(),
                    });
                }
                Ok(None) => {}
                Err(err) => warn!(id = %self.id, error = %err, "Cache read failed"),
            }
        }

        let src = self.src().await?;
        let input = src.data().await?;
        let meta = pipeline::sniff_meta(&input)?;

        let format_modifier = self
            .modifiers
            .get_any(&["f", "format"])
            .filter(|value| !value.is_empty());

        // SVG passes through untouched unless a format conversion was
        // explicitly requested.
        if meta.source_type == "svg" && format_modifier.is_none() {
            return Ok(ProcessedImage {
                bytes: input,
                format: "svg+xml".to_string(),
                meta,
            });
        }

        let format = format_modifier.and_then(OutputFormat::from_name);
        let animated = self.animated() || meta.source_type == "gif";

        let mut ctx = HandlerContext::new(meta.clone());
        let resolved = handlers::resolve_handlers(&self.modifiers);
        let mut pipe = handlers::apply_handlers(&mut ctx, Pipeline::new(animated), resolved);

        if let Some(format) = format {
            let progressive = format == OutputFormat::Jpeg;
            pipe = pipe.to_format(format, ctx.quality, progressive);
        }

        // Encoding is pure CPU work; keep it off the async workers.
        let encoded = tokio::task::spawn_blocking(move || pipe.to_buffer(&input))
            .await
            .map_err(|err| IpxError::internal(format!("Codec task failed: {err}")))??;

        if let Some(cache) = &self.cache {
            let entry = CacheEntry {
                element: CachedElement::new(
                    encoded.bytes.clone(),
                    encoded.format.clone(),
                    meta.clone(),
                ),
                timestamp: Utc::now(),
                expiry: src.max_age,
            };
            let ttl = src.max_age.map(Duration::from_secs);
            if let Err(err) = cache.set(&cache_key, entry, ttl).await {
                warn!(id = %self.id, error = %err, "Cache write failed");
            }
        }

        Ok(ProcessedImage {
            bytes: encoded.bytes,
            format: encoded.format,
            meta,
        })
    }

    fn animated(&self) -> bool {
        match self.modifiers.get_any(&["a", "animated"]) {
            // Present without a value is flag-style true.
            Some("") => true,
            Some(value) => is_truthy(&parse_literal(value)),
            None => false,
        }
    }

    /// JSON-serialized id plus modifiers, insertion order preserved.
    fn cache_key(&self) -> String {
        let mut parts: Vec<(&str, &str)> = vec![("id", self.id.as_str())];
        parts.extend(self.modifiers.iter());
        serde_json::to_string(&parts).unwrap_or_else(|_| self.id.clone())
    }
}
