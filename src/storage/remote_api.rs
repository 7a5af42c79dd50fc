//! Read-only remote raster API store.
//!
//! Fetches slippy-map style tiles. A key `/<z>/<x>/<y>.<ext>` is substituted
//! into a URL template such as
//! `https://tiles.example.com/v1/{z}/{x}/{y}.{ext}` and an `apikey` query
//! parameter is appended. All mutations fail with `NotAllowed`.

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::StoreError;
use crate::key::ThumbnailMask;

use super::retry::{with_retry, RetryPolicy};
use super::{ImageArtifact, ImageStore, WriteMode};

/// Placeholders every URL template must contain.
pub const TEMPLATE_PLACEHOLDERS: [&str; 3] = ["{z}", "{x}", "{y}"];

/// Tile coordinates parsed from a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileCoord<'a> {
    z: u32,
    x: u32,
    y: u32,
    ext: &'a str,
}

impl<'a> TileCoord<'a> {
    fn from_key(key: &'a str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidKey(format!("{} (expected /<z>/<x>/<y>.<ext>)", key));

        let mut parts = key.trim_start_matches('/').split('/');
        let (Some(z), Some(x), Some(file), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let (y, ext) = file.rsplit_once('.').ok_or_else(invalid)?;

        let number = |s: &str| s.parse::<u32>().map_err(|_| invalid());
        Ok(Self {
            z: number(z)?,
            x: number(x)?,
            y: number(y)?,
            ext,
        })
    }
}

/// Store that reads tiles from a remote HTTP raster API.
#[derive(Debug, Clone)]
pub struct RemoteApiStore {
    client: Client,
    url_template: String,
    api_key: String,
    retry: RetryPolicy,
}

impl RemoteApiStore {
    /// Create a store for `url_template`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` when the template lacks a placeholder or does not
    /// produce a valid URL.
    pub fn new(
        client: Client,
        url_template: impl Into<String>,
        api_key: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, StoreError> {
        let store = Self {
            client,
            url_template: url_template.into(),
            api_key: api_key.into(),
            retry,
        };
        if let Some(missing) = TEMPLATE_PLACEHOLDERS
            .iter()
            .find(|p| !store.url_template.contains(**p))
        {
            return Err(StoreError::InvalidKey(format!(
                "url template '{}' is missing {}",
                store.url_template, missing
            )));
        }
        store.url_for("/0/0/0.png")?;
        Ok(store)
    }

    fn url_for(&self, key: &str) -> Result<Url, StoreError> {
        let coord = TileCoord::from_key(key)?;
        let raw = self
            .url_template
            .replace("{z}", &coord.z.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
            .replace("{ext}", coord.ext);

        let mut url = Url::parse(&raw).map_err(|e| StoreError::InvalidKey(format!("{}: {}", raw, e)))?;
        if !self.api_key.is_empty() {
            url.query_pairs_mut().append_pair("apikey", &self.api_key);
        }
        Ok(url)
    }

    async fn get_once(&self, key: &str) -> Result<ImageArtifact, StoreError> {
        let url = self.url_for(key)?;
        debug!(key, host = url.host_str().unwrap_or(""), "Fetching remote tile");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StoreError::upstream(None, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(StoreError::NotFound(key.to_string())),
            status if !status.is_success() => {
                return Err(StoreError::upstream(
                    Some(status.as_u16()),
                    format!("GET {}", key),
                ))
            }
            _ => {}
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map_err(|e| StoreError::upstream(None, e.to_string()))?;

        match content_type {
            Some(ct) if ct.starts_with("image/") => Ok(ImageArtifact::new(data, ct)),
            None => Ok(ImageArtifact::for_key(key, data)),
            Some(ct) if ct.starts_with("application/octet-stream") => {
                Ok(ImageArtifact::for_key(key, data))
            }
            // a 2xx error page won't change on retry
            Some(ct) => Err(StoreError::Upstream {
                status: Some(StatusCode::OK.as_u16()),
                message: format!("unexpected content type '{}' for {}", ct, key),
            }),
        }
    }

    fn not_allowed(operation: &'static str) -> StoreError {
        StoreError::NotAllowed {
            backend: "remote-api",
            operation,
        }
    }
}

#[async_trait]
impl ImageStore for RemoteApiStore {
    fn backend(&self) -> &'static str {
        "remote-api"
    }

    async fn get(&self, key: &str) -> Result<ImageArtifact, StoreError> {
        with_retry(&self.retry, "get", move || self.get_once(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn put(
        &self,
        _key: &str,
        _artifact: &ImageArtifact,
        _mode: WriteMode,
    ) -> Result<(), StoreError> {
        Err(Self::not_allowed("put"))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(Self::not_allowed("delete"))
    }

    async fn delete_matching(&self, _mask: &ThumbnailMask) -> Result<usize, StoreError> {
        Err(Self::not_allowed("delete_matching"))
    }
}
