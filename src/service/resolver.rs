//! Resolution orchestrator.
//!
//! One [`Resolver`] per configured source. It turns a request key into an
//! artifact (GET) and applies source mutations (POST, PUT, DELETE), keeping
//! the cache consistent by deleting every derived artifact matched by the
//! source's thumbnail mask.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use image::ImageFormat;
use tracing::{debug, info, warn};

use crate::error::{ProcessingError, ServiceError, StoreError};
use crate::key::{parse_request_key, ParsedKey};
use crate::storage::{ImageArtifact, ImageStore, WriteMode};
use crate::transform::{
    detect_image_format, mime_for_format, pipeline, ProcessingConfiguration, ProcessingEngine,
    TokenRegistry,
};

use super::flight::{Role, SingleFlight};

/// Where a GET response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Read from the cache store
    Hit,
    /// Generated (or fetched verbatim) and written to the cache
    Created,
    /// Generated or fetched without a cache write, or shared from a
    /// concurrent generation
    Served,
}

impl CacheStatus {
    pub fn status_code(self) -> StatusCode {
        match self {
            CacheStatus::Created => StatusCode::CREATED,
            CacheStatus::Hit | CacheStatus::Served => StatusCode::OK,
        }
    }

    pub fn is_hit(self) -> bool {
        self == CacheStatus::Hit
    }
}

/// Result of a GET.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub artifact: ImageArtifact,
    pub status: CacheStatus,
}

type FlightResult = Result<ImageArtifact, ServiceError>;

/// Orchestrates cache lookups, generation and source mutations for one
/// source.
pub struct Resolver {
    name: String,
    source: Arc<dyn ImageStore>,
    cache: Arc<dyn ImageStore>,
    engine: Arc<dyn ProcessingEngine>,
    registry: Arc<TokenRegistry>,
    cache_originals: bool,
    flights: SingleFlight<FlightResult>,
    /// Bumped by every source mutation; generations that straddle a bump
    /// are not cached.
    epoch: AtomicU64,
}

impl Resolver {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn ImageStore>,
        cache: Arc<dyn ImageStore>,
        engine: Arc<dyn ProcessingEngine>,
        registry: Arc<TokenRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            cache,
            engine,
            registry,
            cache_originals: true,
            flights: SingleFlight::new(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Whether verbatim source requests are copied into the cache.
    pub fn with_cache_originals(mut self, enabled: bool) -> Self {
        self.cache_originals = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn caches_originals(&self) -> bool {
        self.cache_originals
    }

    pub fn source(&self) -> &Arc<dyn ImageStore> {
        &self.source
    }

    pub fn cache(&self) -> &Arc<dyn ImageStore> {
        &self.cache
    }

    // =========================================================================
    // GET
    // =========================================================================

    /// Resolve a request key to an image.
    ///
    /// Cached artifacts are returned as [`CacheStatus::Hit`]. On a miss the
    /// source is fetched, transformed and persisted under the full request
    /// key. Concurrent misses for the same key share one generation.
    pub async fn get(&self, path: &str) -> Result<Resolved, ServiceError> {
        let parsed = parse_request_key(path)?;
        let config = ProcessingConfiguration::parse(&parsed.config, &self.registry)?;

        // verbatim requests bypass the cache entirely when originals aren't cached
        if config.is_default && !self.cache_originals {
            let artifact = self.fetch_source(&parsed).await?;
            return Ok(Resolved {
                artifact,
                status: CacheStatus::Served,
            });
        }

        if let Some(artifact) = self.lookup_cache(&parsed.request_key).await {
            return Ok(Resolved {
                artifact,
                status: CacheStatus::Hit,
            });
        }

        loop {
            match self.flights.join(&parsed.request_key) {
                Role::Leader(leader) => {
                    // a previous leader may have finished since the lookup
                    if let Some(artifact) = self.lookup_cache(&parsed.request_key).await {
                        leader.complete(Ok(artifact.clone()));
                        return Ok(Resolved {
                            artifact,
                            status: CacheStatus::Hit,
                        });
                    }

                    let result = self.generate(&parsed, &config).await;
                    let shared = match &result {
                        Ok(resolved) => Ok(resolved.artifact.clone()),
                        Err(e) => Err(e.clone()),
                    };
                    leader.complete(shared);
                    return result;
                }
                Role::Waiter(waiter) => {
                    if let Some(result) = waiter.wait().await {
                        debug!(
                            source = %self.name,
                            key = %parsed.request_key,
                            "Shared concurrent generation"
                        );
                        return result.map(|artifact| Resolved {
                            artifact,
                            status: CacheStatus::Served,
                        });
                    }
                }
            }
        }
    }

    async fn lookup_cache(&self, key: &str) -> Option<ImageArtifact> {
        match self.cache.get(key).await {
            Ok(artifact) => {
                debug!(source = %self.name, key, bytes = artifact.len(), "Cache hit");
                Some(artifact)
            }
            Err(StoreError::NotFound(_)) => {
                debug!(source = %self.name, key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(source = %self.name, key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn fetch_source(&self, parsed: &ParsedKey) -> Result<ImageArtifact, ServiceError> {
        let key = parsed.source_key.as_str();
        match self.source.get(key).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                debug!(source = %self.name, key, error = %e, "Source fetch failed");
                Err(e.into())
            }
        }
    }

    async fn generate(
        &self,
        parsed: &ParsedKey,
        config: &ProcessingConfiguration,
    ) -> Result<Resolved, ServiceError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let original = self.fetch_source(parsed).await?;

        let artifact = if config.is_default {
            original
        } else {
            self.transform(original.data, config.clone()).await?
        };

        let key = parsed.request_key.as_str();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(source = %self.name, key, "Source changed during generation, not caching");
            return Ok(Resolved {
                artifact,
                status: CacheStatus::Served,
            });
        }

        let mut status = self.persist(key, &artifact).await;
        // a mutation may have invalidated between the check and the write
        if status == CacheStatus::Created && self.epoch.load(Ordering::SeqCst) != epoch {
            if let Err(e) = self.cache.delete(key).await {
                warn!(source = %self.name, key, error = %e, "Failed to drop stale artifact");
            }
            status = CacheStatus::Served;
        }
        Ok(Resolved { artifact, status })
    }

    async fn transform(
        &self,
        data: Bytes,
        config: ProcessingConfiguration,
    ) -> Result<ImageArtifact, ServiceError> {
        let engine = self.engine.clone();
        let processed = tokio::task::spawn_blocking(move || {
            pipeline::apply(engine.as_ref(), &data, &config)
        })
        .await
        .map_err(|e| ProcessingError::Task(e.to_string()))??;

        Ok(ImageArtifact::new(processed.data, processed.content_type))
    }

    /// Write a generated artifact to the cache. A failed write still serves
    /// the artifact.
    async fn persist(&self, key: &str, artifact: &ImageArtifact) -> CacheStatus {
        match self.cache.put(key, artifact, WriteMode::Overwrite).await {
            Ok(()) => {
                info!(source = %self.name, key, bytes = artifact.len(), "Cached artifact");
                CacheStatus::Created
            }
            Err(e) => {
                warn!(source = %self.name, key, error = %e, "Cache write failed");
                CacheStatus::Served
            }
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Store a new source image (POST).
    ///
    /// Fails with `Conflict` when the source already exists and with
    /// `InvalidMediaType` when the body is not an image of the key's type.
    pub async fn create(&self, path: &str, body: Bytes) -> Result<(), ServiceError> {
        let parsed = parse_write_key(path)?;
        let key = parsed.source_key.as_str();

        if self.source.exists(key).await? {
            return Err(ServiceError::Conflict(key.to_string()));
        }
        let artifact = validate_upload(&parsed, body)?;
        self.source.put(key, &artifact, WriteMode::Create).await?;

        info!(source = %self.name, key, bytes = artifact.len(), "Created source image");
        Ok(())
    }

    /// Store or replace a source image (PUT) and invalidate its derived
    /// artifacts. Returns the number of cache entries removed.
    pub async fn replace(&self, path: &str, body: Bytes) -> Result<usize, ServiceError> {
        let parsed = parse_write_key(path)?;
        let key = parsed.source_key.as_str();

        let artifact = validate_upload(&parsed, body)?;
        self.source.put(key, &artifact, WriteMode::Overwrite).await?;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let removed = self.invalidate(&parsed).await?;

        info!(source = %self.name, key, bytes = artifact.len(), removed, "Replaced source image");
        Ok(removed)
    }

    /// Delete a source image (DELETE) and its derived artifacts. Returns the
    /// number of cache entries removed.
    pub async fn delete(&self, path: &str) -> Result<usize, ServiceError> {
        let parsed = parse_write_key(path)?;
        let key = parsed.source_key.as_str();

        self.source.delete(key).await?;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let removed = self.invalidate(&parsed).await?;

        info!(source = %self.name, key, removed, "Deleted source image");
        Ok(removed)
    }

    async fn invalidate(&self, parsed: &ParsedKey) -> Result<usize, ServiceError> {
        let removed = self.cache.delete_matching(&parsed.thumbnail_mask).await?;
        debug!(source = %self.name, mask = %parsed.thumbnail_mask, removed, "Invalidated derived artifacts");
        Ok(removed)
    }
}

/// Parse a key for a mutation. Processing tokens are rejected.
fn parse_write_key(path: &str) -> Result<ParsedKey, ServiceError> {
    let parsed = parse_request_key(path)?;
    if !parsed.is_source_request() {
        return Err(ServiceError::InvalidRequestValue(format!(
            "processing tokens are not allowed when writing '{}'",
            parsed.request_key
        )));
    }
    Ok(parsed)
}

/// Check an upload body is a JPEG or PNG matching the key extension.
fn validate_upload(parsed: &ParsedKey, body: Bytes) -> Result<ImageArtifact, ServiceError> {
    if body.is_empty() {
        return Err(ServiceError::InvalidMediaType("empty body".to_string()));
    }

    let format = detect_image_format(&body).ok_or_else(|| {
        ServiceError::InvalidMediaType("body is not a JPEG or PNG image".to_string())
    })?;

    let extension = parsed.source_key.extension();
    let expected = if extension.eq_ignore_ascii_case("png") {
        ImageFormat::Png
    } else {
        ImageFormat::Jpeg
    };
    if format != expected {
        return Err(ServiceError::InvalidMediaType(format!(
            "{} body does not match .{} key",
            mime_for_format(format),
            extension
        )));
    }

    Ok(ImageArtifact::new(body, mime_for_format(format)))
}
