//! In-memory LRU store.
//!
//! Size-bounded: the store tracks the total bytes held and evicts
//! least-recently-used entries once the capacity is exceeded. Useful as a
//! cache store for small deployments and as a test double.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::key::ThumbnailMask;

use super::{ImageArtifact, ImageStore, WriteMode};

/// Default capacity: 64MB
pub const DEFAULT_MEMORY_CAPACITY: usize = 64 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

struct Inner {
    entries: LruCache<String, ImageArtifact>,
    current_size: usize,
}

/// LRU store with byte-size based eviction.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl MemoryStore {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Create a store holding at most `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a store bounded by bytes and by entry count.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(max_entries),
                current_size: 0,
            }),
            max_size,
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total stored bytes.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.current_size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Snapshot of the stored keys, most recently used first.
    pub async fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<ImageArtifact, StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.entries.contains(key))
    }

    async fn put(
        &self,
        key: &str,
        artifact: &ImageArtifact,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if let Some(old) = inner.entries.peek(key) {
            if mode == WriteMode::Create {
                return Err(StoreError::Conflict(key.to_string()));
            }
            let old_len = old.len();
            inner.current_size = inner.current_size.saturating_sub(old_len);
        }

        // push() reports an entry evicted by the count bound
        if let Some((evicted_key, evicted)) = inner.entries.push(key.to_string(), artifact.clone()) {
            if evicted_key != key {
                inner.current_size = inner.current_size.saturating_sub(evicted.len());
            }
        }
        inner.current_size += artifact.len();

        while inner.current_size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.entries.pop(key) {
            Some(old) => {
                inner.current_size = inner.current_size.saturating_sub(old.len());
                Ok(())
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn delete_matching(&self, mask: &ThumbnailMask) -> Result<usize, StoreError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, _)| mask.matches(k))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &doomed {
            if let Some(old) = inner.entries.pop(key) {
                inner.current_size = inner.current_size.saturating_sub(old.len());
            }
        }
        Ok(doomed.len())
    }
}
