//! S3 store.
//!
//! Objects live under an optional prefix: key `/a/b.jpg` with prefix
//! `images` is stored as `images/a/b.jpg`. Works with S3-compatible
//! services (MinIO etc.) through a custom endpoint.

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::key::ThumbnailMask;

use super::retry::{with_retry, RetryPolicy};
use super::{ImageArtifact, ImageStore, WriteMode};

/// Store backed by an S3 bucket.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
    retry: RetryPolicy,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>, prefix: &str, retry: RetryPolicy) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.trim_matches('/').to_string(),
            retry,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &str) -> String {
        let relative = key.trim_start_matches('/');
        if self.prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.prefix, relative)
        }
    }

    fn store_key(&self, object_key: &str) -> Option<String> {
        let relative = if self.prefix.is_empty() {
            object_key
        } else {
            object_key.strip_prefix(&self.prefix)?.strip_prefix('/')?
        };
        Some(format!("/{}", relative))
    }

    async fn get_once(&self, key: &str) -> Result<ImageArtifact, StoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let content_type = resp
            .content_type()
            .filter(|ct| ct.starts_with("image/"))
            .map(str::to_string);

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::upstream(None, e.to_string()))?
            .into_bytes();

        Ok(match content_type {
            Some(ct) => ImageArtifact::new(data, ct),
            None => ImageArtifact::for_key(key, data),
        })
    }

    async fn exists_once(&self, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match map_sdk_error(e, key) {
                StoreError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn put_once(
        &self,
        key: &str,
        artifact: &ImageArtifact,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .content_type(&artifact.content_type)
            .body(ByteStream::from(artifact.data.clone()));
        if mode == WriteMode::Create {
            request = request.if_none_match("*");
        }
        request.send().await.map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    async fn delete_once(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    /// All store keys whose object key starts with `prefix`.
    async fn list_once(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, prefix))?;

            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter_map(|k| self.store_key(k)),
            );

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(keys)
    }
}

/// Map an SDK error to a store error, keyed on the HTTP status when present.
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, key: &str) -> StoreError {
    let status = err.raw_response().map(|r| r.status().as_u16());
    match status {
        Some(404) => StoreError::NotFound(key.to_string()),
        Some(412) => StoreError::Conflict(key.to_string()),
        Some(code) => StoreError::upstream(Some(code), format!("{}: {}", key, err)),
        None => {
            // Fallback: check the error string for common patterns
            let message = err.to_string();
            if message.contains("NoSuchKey") || message.contains("NotFound") {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::upstream(None, format!("{}: {}", key, message))
            }
        }
    }
}

#[async_trait]
impl ImageStore for S3Store {
    fn backend(&self) -> &'static str {
        "s3"
    }

    async fn get(&self, key: &str) -> Result<ImageArtifact, StoreError> {
        with_retry(&self.retry, "get", move || self.get_once(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        with_retry(&self.retry, "exists", move || self.exists_once(key)).await
    }

    async fn put(
        &self,
        key: &str,
        artifact: &ImageArtifact,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        with_retry(&self.retry, "put", move || self.put_once(key, artifact, mode)).await?;
        debug!(bucket = %self.bucket, key, bytes = artifact.len(), "Stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        // DeleteObject succeeds for missing keys
        if !self.exists(key).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        with_retry(&self.retry, "delete", move || self.delete_once(key)).await
    }

    async fn delete_matching(&self, mask: &ThumbnailMask) -> Result<usize, StoreError> {
        let prefix = self.object_key(mask.literal_prefix());
        let prefix = prefix.as_str();
        let keys = with_retry(&self.retry, "list", move || self.list_once(prefix)).await?;

        let mut removed = 0;
        for key in keys.iter().filter(|k| mask.matches(k)) {
            let key = key.as_str();
            if let Err(e) = with_retry(&self.retry, "delete", move || self.delete_once(key)).await {
                warn!(key, error = %e, "Failed to delete derived object");
                return Err(e);
            }
            removed += 1;
        }
        Ok(removed)
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing
    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if endpoint_url.is_some() {
        builder = builder.force_path_style(true);
    }
    Client::from_conf(builder.build())
}
