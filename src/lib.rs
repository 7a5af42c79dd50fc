//! # thumbkey
//!
//! An on-demand image derivation cache.
//!
//! A request path names a source image plus a chain of processing tokens
//! appended to its filename. `GET /photos/cat_s150x150_q60.jpg` is answered
//! from the cache store when present; otherwise `/photos/cat.jpg` is fetched
//! from the source backend, resized to 150x150, re-encoded at quality 60,
//! written to the cache under the full request key, and returned.
//!
//! ## Features
//!
//! - **Compact keys**: resize (`100`, `200x100f`, `s150x150`) and quality (`q60`) tokens
//! - **Pluggable backends**: filesystem, WebDAV, S3 and a read-only tile API as sources;
//!   any writable backend or an in-memory LRU as the cache
//! - **Cascading invalidation**: replacing or deleting a source removes every
//!   derived image through a glob mask
//! - **Single-flight generation**: concurrent misses for one key transform once
//!
//! ## Architecture
//!
//! - [`key`] - Request key grammar and validation
//! - [`transform`] - Token registry, geometry and the processing engine
//! - [`storage`] - Image stores for sources and caches
//! - [`service`] - Resolution orchestrator and source routing
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and source descriptors
//!
//! ## Example
//!
//! ```rust,no_run
//! use thumbkey::{build_resolvers, create_router, parse_descriptors, RetryPolicy, RouterConfig, SourceMap};
//!
//! #[tokio::main]
//! async fn main() {
//!     let descriptors = parse_descriptors(r#"[{
//!         "name": "photos",
//!         "source": { "type": "filesystem", "storage_directory": "/srv/photos" },
//!         "cache": { "type": "memory" }
//!     }]"#)
//!     .unwrap();
//!
//!     let resolvers = build_resolvers(&descriptors, &RetryPolicy::default())
//!         .await
//!         .unwrap();
//!     let router = create_router(SourceMap::new(resolvers), RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod server;
pub mod service;
pub mod storage;
pub mod transform;

// Re-export commonly used types
pub use config::{
    parse_descriptors, validate_sources, BackendDescriptor, CheckConfig, Cli, Command,
    ProcessorKind, ServeConfig, SourceArgs, SourceDescriptor,
};
pub use error::{ConfigError, ParseError, ProcessingError, ServiceError, StoreError};
pub use key::{parse_request_key, ParsedKey, SourceKey, ThumbnailMask};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use service::{build_resolvers, CacheStatus, Resolved, Resolver, SourceMap};
pub use storage::{
    create_s3_client, FilesystemStore, ImageArtifact, ImageStore, MemoryStore, RemoteApiStore,
    RetryPolicy, S3Store, WebDavStore, WriteMode,
};
pub use transform::{
    compute_geometry, Geometry, ProcessingConfiguration, ProcessingEngine, RasterEngine,
    ResizeMode, SaveOptions, TokenRegistry, TransformationSpec,
};
