//! Builds resolvers from source descriptors and routes request paths to them.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use crate::config::{BackendDescriptor, ProcessorKind, SourceDescriptor};
use crate::error::ConfigError;
use crate::storage::{
    create_s3_client, FilesystemStore, ImageStore, MemoryStore, RemoteApiStore, RetryPolicy,
    S3Store, WebDavStore,
};
use crate::transform::{ProcessingEngine, RasterEngine, TokenRegistry};

use super::resolver::Resolver;

/// Construct the store a backend descriptor names.
///
/// Filesystem directories are created if missing. The HTTP client is shared
/// by every remote backend.
pub async fn build_store(
    name: &str,
    descriptor: &BackendDescriptor,
    client: &Client,
    retry: &RetryPolicy,
) -> Result<Arc<dyn ImageStore>, ConfigError> {
    let backend_error = |reason: String| ConfigError::Backend {
        name: name.to_string(),
        reason,
    };

    let store: Arc<dyn ImageStore> = match descriptor {
        BackendDescriptor::Filesystem { storage_directory } => {
            tokio::fs::create_dir_all(storage_directory)
                .await
                .map_err(|source| ConfigError::Io {
                    path: storage_directory.display().to_string(),
                    source,
                })?;
            Arc::new(FilesystemStore::new(storage_directory.clone()))
        }
        BackendDescriptor::Webdav { endpoint, token } => Arc::new(WebDavStore::new(
            client.clone(),
            endpoint.clone(),
            token.clone(),
            *retry,
        )),
        BackendDescriptor::RemoteApi {
            url_template,
            api_key,
        } => Arc::new(
            RemoteApiStore::new(
                client.clone(),
                url_template.clone(),
                api_key.clone(),
                *retry,
            )
            .map_err(|e| backend_error(e.to_string()))?,
        ),
        BackendDescriptor::S3 {
            bucket,
            prefix,
            endpoint,
            region,
        } => {
            let s3 = create_s3_client(endpoint.as_deref(), region).await;
            Arc::new(S3Store::new(s3, bucket.clone(), prefix, *retry))
        }
        BackendDescriptor::Memory { capacity_bytes } => {
            Arc::new(MemoryStore::with_capacity(*capacity_bytes))
        }
    };
    Ok(store)
}

/// Construct the processing engine a descriptor names.
pub fn build_engine(kind: ProcessorKind) -> Arc<dyn ProcessingEngine> {
    match kind {
        ProcessorKind::Raster => Arc::new(RasterEngine::new()),
    }
}

/// Build one resolver per descriptor.
pub async fn build_resolvers(
    descriptors: &[SourceDescriptor],
    retry: &RetryPolicy,
) -> Result<Vec<Resolver>, ConfigError> {
    let client = Client::new();
    let registry = Arc::new(TokenRegistry::default());

    let mut resolvers = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let source = build_store(&descriptor.name, &descriptor.source, &client, retry).await?;
        let cache = build_store(&descriptor.name, &descriptor.cache, &client, retry).await?;
        let engine = build_engine(descriptor.processor);

        info!(
            source = %descriptor.name,
            backend = source.backend(),
            cache = cache.backend(),
            processor = engine.name(),
            cache_originals = descriptor.caches_originals(),
            "Configured source"
        );

        resolvers.push(
            Resolver::new(&descriptor.name, source, cache, engine, registry.clone())
                .with_cache_originals(descriptor.caches_originals()),
        );
    }
    Ok(resolvers)
}

// =============================================================================
// Routing
// =============================================================================

/// Routes request paths to resolvers.
///
/// With a single source every path belongs to it. With several, the first
/// path segment names the source and the rest is the request key.
#[derive(Clone)]
pub struct SourceMap {
    single: Option<Arc<Resolver>>,
    by_name: HashMap<String, Arc<Resolver>>,
}

impl SourceMap {
    pub fn new(resolvers: Vec<Resolver>) -> Self {
        let mut resolvers: Vec<Arc<Resolver>> = resolvers.into_iter().map(Arc::new).collect();
        let single = if resolvers.len() == 1 {
            resolvers.pop()
        } else {
            None
        };
        let by_name = resolvers
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();
        Self { single, by_name }
    }

    /// Resolve `path` to its resolver and the request key within it.
    ///
    /// Returns `None` when no configured source owns the path.
    pub fn route<'a>(&self, path: &'a str) -> Option<(Arc<Resolver>, &'a str)> {
        if let Some(resolver) = &self.single {
            return Some((resolver.clone(), path));
        }

        let trimmed = path.trim_start_matches('/');
        let (name, rest) = trimmed.split_once('/')?;
        let resolver = self.by_name.get(name)?;
        // keep the leading '/' of the remaining key
        let key = &path[path.len() - rest.len() - 1..];
        Some((resolver.clone(), key))
    }

    /// Names of every configured source.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = match &self.single {
            Some(resolver) => vec![resolver.name()],
            None => self.by_name.keys().map(String::as_str).collect(),
        };
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.single.iter().count() + self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
