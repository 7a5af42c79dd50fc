//! Local filesystem store.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::key::{ThumbnailMask, MASK_MATCH_OPTIONS};

use super::{ImageArtifact, ImageStore, WriteMode};

/// Stores images as files under a base directory.
///
/// Key `/a/b.jpg` maps to `<root>/a/b.jpg`. Parent directories are created
/// on write. Every write goes to its own temporary sibling and is renamed
/// into place, so readers never observe a partial file and concurrent
/// overwrites resolve to one complete writer.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = key.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|s| s.is_empty() || s == "..") {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn write_file(
        &self,
        key: &str,
        path: &Path,
        artifact: &ImageArtifact,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?
            .to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        let key = key.to_string();
        let path = path.to_path_buf();
        let data = artifact.data.clone();
        tokio::task::spawn_blocking(move || write_atomic(&key, &parent, &path, &data, mode))
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?
    }
}

/// Write `data` to a private temporary file in `parent`, then move it onto
/// `path`. Each call gets its own temporary file, so concurrent writers to
/// one key never share a handle. A dropped temp file removes itself.
fn write_atomic(
    key: &str,
    parent: &Path,
    path: &Path,
    data: &[u8],
    mode: WriteMode,
) -> Result<(), StoreError> {
    // leading dot keeps temp files out of thumbnail masks
    let mut temp = tempfile::Builder::new()
        .prefix(".thumbkey-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;

    let persisted = match mode {
        WriteMode::Overwrite => temp.persist(path),
        WriteMode::Create => temp.persist_noclobber(path),
    };
    match persisted {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
            Err(StoreError::Conflict(key.to_string()))
        }
        Err(e) => Err(StoreError::Operation(format!(
            "failed to move {} into place: {}",
            key, e.error
        ))),
    }
}

#[async_trait]
impl ImageStore for FilesystemStore {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    async fn get(&self, key: &str) -> Result<ImageArtifact, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(ImageArtifact::for_key(key, data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        artifact: &ImageArtifact,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        self.write_file(key, &path, artifact, mode).await?;
        debug!(key, path = %path.display(), bytes = artifact.len(), "Wrote file");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_matching(&self, mask: &ThumbnailMask) -> Result<usize, StoreError> {
        let relative = mask.as_str().trim_start_matches('/');
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            relative
        );

        let paths = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>, StoreError> {
            let entries = glob::glob_with(&pattern, MASK_MATCH_OPTIONS)
                .map_err(|e| StoreError::Operation(format!("bad pattern '{}': {}", pattern, e)))?;
            Ok(entries.filter_map(Result::ok).filter(|p| p.is_file()).collect())
        })
        .await
        .map_err(|e| StoreError::Operation(e.to_string()))??;

        let mut removed = 0;
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                // raced with another delete
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete derived file");
                    return Err(e.into());
                }
            }
        }
        Ok(removed)
    }
}
