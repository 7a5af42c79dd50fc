//! Image stores.
//!
//! A store holds encoded images under `/`-prefixed keys. The same trait backs
//! both roles a source plays: the *source accessor* (originals) and the
//! *cache store* (derived artifacts, keyed by the full request key).
//!
//! # Backends
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │   dyn ImageStore     │
//!                    └──────────┬───────────┘
//!        ┌─────────────┬────────┴────┬──────────────┬─────────────┐
//!        ▼             ▼             ▼              ▼             ▼
//!  ┌───────────┐ ┌───────────┐ ┌────────────┐ ┌───────────┐ ┌──────────┐
//!  │Filesystem │ │  WebDAV   │ │ RemoteApi  │ │    S3     │ │  Memory  │
//!  │ tokio::fs │ │  reqwest  │ │ read-only  │ │aws-sdk-s3 │ │   LRU    │
//!  └───────────┘ └─────┬─────┘ └─────┬──────┘ └─────┬─────┘ └──────────┘
//!                      └─────────────┴──────────────┘
//!                        with_retry (tokio-retry)
//! ```
//!
//! Remote backends retry transient failures a bounded number of times;
//! the filesystem and memory stores never retry.

mod filesystem;
mod memory;
mod remote_api;
mod retry;
mod s3;
mod webdav;

pub use filesystem::FilesystemStore;
pub use memory::{MemoryStore, DEFAULT_MEMORY_CAPACITY};
pub use remote_api::RemoteApiStore;
pub use retry::{with_retry, RetryPolicy, DEFAULT_RETRY_ATTEMPTS};
pub use s3::{create_s3_client, S3Store};
pub use webdav::WebDavStore;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::key::ThumbnailMask;

// =============================================================================
// Artifact
// =============================================================================

/// Encoded image bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub data: Bytes,
    pub content_type: String,
}

impl ImageArtifact {
    pub fn new(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }

    /// Build an artifact whose MIME type is derived from the key extension.
    pub fn for_key(key: &str, data: impl Into<Bytes>) -> Self {
        Self::new(data, content_type_for_key(key))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// MIME type for a key, based on its extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Store Trait
// =============================================================================

/// How [`ImageStore::put`] treats an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with [`StoreError::Conflict`] if the key exists
    Create,
    /// Replace any existing value
    Overwrite,
}

/// Keyed storage for encoded images.
///
/// Keys are `/`-prefixed and already validated by the key parser.
/// Implementations must be safe to share across request tasks.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Backend name for logs and error messages.
    fn backend(&self) -> &'static str;

    /// Fetch the value stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<ImageArtifact, StoreError>;

    /// Whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Store `artifact` under `key`.
    async fn put(&self, key: &str, artifact: &ImageArtifact, mode: WriteMode)
        -> Result<(), StoreError>;

    /// Delete `key`. Returns [`StoreError::NotFound`] when it is absent.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key matched by `mask` and return how many were removed.
    async fn delete_matching(&self, mask: &ThumbnailMask) -> Result<usize, StoreError>;
}
