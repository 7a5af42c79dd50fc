//! WebDAV store.
//!
//! Talks plain WebDAV over `reqwest`: `GET`, `HEAD`, `PUT`, `DELETE`,
//! `MKCOL` for missing parent collections and `PROPFIND` (depth 1) to list a
//! collection when deleting by mask. Every request carries an
//! `Authorization: OAuth <token>` header.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::error::StoreError;
use crate::key::ThumbnailMask;

use super::retry::{with_retry, RetryPolicy};
use super::{ImageArtifact, ImageStore, WriteMode};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

/// Store backed by a WebDAV collection.
///
/// Keys are appended to the endpoint, so an endpoint of
/// `https://dav.example.com/images` maps `/a/b.jpg` to
/// `https://dav.example.com/images/a/b.jpg`.
#[derive(Debug, Clone)]
pub struct WebDavStore {
    client: Client,
    endpoint: Url,
    token: String,
    retry: RetryPolicy,
}

impl WebDavStore {
    pub fn new(client: Client, endpoint: Url, token: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoint,
            token: token.into(),
            retry,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Absolute URL for a `/`-prefixed key or collection path.
    fn url_for(&self, path: &str) -> Result<Url, StoreError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        Url::parse(&format!("{}{}", base, path))
            .map_err(|e| StoreError::InvalidKey(format!("{}: {}", path, e)))
    }

    /// Path component of the endpoint without a trailing `/`.
    fn root_path(&self) -> &str {
        self.endpoint.path().trim_end_matches('/')
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("OAuth {}", self.token))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, StoreError> {
        request
            .send()
            .await
            .map_err(|e| StoreError::upstream(None, e.to_string()))
    }

    async fn get_once(&self, key: &str) -> Result<ImageArtifact, StoreError> {
        let url = self.url_for(key)?;
        let response = self.send(self.request(Method::GET, url)).await?;
        let response = check_status(response, key).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map_err(|e| StoreError::upstream(None, e.to_string()))?;

        Ok(match content_type {
            Some(content_type) => ImageArtifact::new(data, content_type),
            None => ImageArtifact::for_key(key, data),
        })
    }

    async fn exists_once(&self, key: &str) -> Result<bool, StoreError> {
        let url = self.url_for(key)?;
        let response = self.send(self.request(Method::HEAD, url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StoreError::upstream(
                Some(status.as_u16()),
                format!("HEAD {}", key),
            )),
        }
    }

    async fn put_once(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        mode: WriteMode,
    ) -> Result<StatusCode, StoreError> {
        let url = self.url_for(key)?;
        let mut request = self
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, data.len())
            .body(data);
        if mode == WriteMode::Create {
            request = request.header(http::header::IF_NONE_MATCH, "*");
        }
        let response = self.send(request).await?;
        Ok(response.status())
    }

    async fn mkcol_once(&self, collection: &str) -> Result<(), StoreError> {
        let method = webdav_method("MKCOL")?;
        let url = self.url_for(collection)?;
        let response = self.send(self.request(method, url)).await?;
        match response.status() {
            // 405: collection already exists
            status if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status => Err(StoreError::upstream(
                Some(status.as_u16()),
                format!("MKCOL {}", collection),
            )),
        }
    }

    /// Create every missing collection above `key`, outermost first.
    async fn ensure_collections(&self, key: &str) -> Result<(), StoreError> {
        for collection in parent_collections(key) {
            with_retry(&self.retry, "mkcol", move || self.mkcol_once(collection)).await?;
        }
        Ok(())
    }

    async fn delete_once(&self, key: &str) -> Result<(), StoreError> {
        let url = self.url_for(key)?;
        let response = self.send(self.request(Method::DELETE, url)).await?;
        check_status(response, key).await.map(|_| ())
    }

    async fn list_once(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let method = webdav_method("PROPFIND")?;
        let url = self.url_for(collection)?;
        let request = self
            .request(method, url)
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = check_status(response, collection).await?;
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::upstream(None, e.to_string()))?;

        Ok(extract_hrefs(&body)
            .into_iter()
            .filter_map(|href| href_to_key(&href, self.root_path()))
            .collect())
    }
}

#[async_trait]
impl ImageStore for WebDavStore {
    fn backend(&self) -> &'static str {
        "webdav"
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
        let content_type = artifact.content_type.as_str();
        let attempt = move || {
            let data = artifact.data.clone();
            async move {
                let status = self.put_once(key, data, content_type, mode).await?;
                if status.is_server_error() {
                    return Err(StoreError::upstream(
                        Some(status.as_u16()),
                        format!("PUT {}", key),
                    ));
                }
                Ok(status)
            }
        };

        let mut status = with_retry(&self.retry, "put", attempt).await?;

        // 409 means an intermediate collection is missing
        if status == StatusCode::CONFLICT {
            debug!(key, "Creating parent collections");
            self.ensure_collections(key).await?;
            status = with_retry(&self.retry, "put", attempt).await?;
        }

        match status {
            s if s.is_success() => Ok(()),
            StatusCode::PRECONDITION_FAILED => Err(StoreError::Conflict(key.to_string())),
            s => Err(StoreError::upstream(Some(s.as_u16()), format!("PUT {}", key))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        with_retry(&self.retry, "delete", move || self.delete_once(key)).await
    }

    async fn delete_matching(&self, mask: &ThumbnailMask) -> Result<usize, StoreError> {
        let collection = mask.directory();
        let keys = with_retry(&self.retry, "propfind", move || self.list_once(collection)).await?;

        let mut removed = 0;
        for key in keys.iter().filter(|k| mask.matches(k)) {
            match self.delete(key).await {
                Ok(()) => removed += 1,
                Err(StoreError::NotFound(_)) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete derived artifact");
                    return Err(e);
                }
            }
        }
        Ok(removed)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn webdav_method(name: &'static str) -> Result<Method, StoreError> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| StoreError::Operation(format!("invalid method {}: {}", name, e)))
}

/// Map a non-2xx response to an error; 404 becomes `NotFound(key)`.
async fn check_status(response: Response, key: &str) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(key.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    let detail: String = body.chars().take(200).collect();
    Err(StoreError::upstream(
        Some(status.as_u16()),
        format!("{} {}", key, detail.trim()),
    ))
}

/// `/a/b/c.jpg` yields `["/a/", "/a/b/"]`.
fn parent_collections(key: &str) -> Vec<&str> {
    key.match_indices('/')
        .map(|(idx, _)| &key[..=idx])
        .filter(|prefix| *prefix != "/")
        .collect()
}

/// Collect the text of every `<href>` element, whatever its namespace prefix.
fn extract_hrefs(body: &str) -> Vec<String> {
    let mut hrefs = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];
        let Some(end) = rest.find('>') else { break };
        let tag = &rest[..end];
        rest = &rest[end + 1..];

        let name = tag.split_whitespace().next().unwrap_or("");
        let local = name.rsplit(':').next().unwrap_or(name);
        if name.starts_with('/') || !local.eq_ignore_ascii_case("href") || tag.ends_with('/') {
            continue;
        }

        if let Some(close) = rest.find('<') {
            let text = rest[..close].trim();
            if !text.is_empty() {
                hrefs.push(decode_entities(text));
            }
            rest = &rest[close..];
        }
    }
    hrefs
}

/// Replace the predefined XML entities and numeric character references.
/// Unknown references are kept as written.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else { break };

        let decoded = match &rest[1..semi] {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            entity => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                .and_then(Result::ok)
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Turn an href (absolute URL or path) into a store key relative to `root`.
///
/// Both are percent-decoded before comparison. Collections (trailing `/`)
/// and hrefs outside the root are skipped.
fn href_to_key(href: &str, root: &str) -> Option<String> {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    if path.ends_with('/') {
        return None;
    }
    let path = urlencoding::decode(&path).ok()?;
    let root = urlencoding::decode(root).ok()?;
    let key = path.strip_prefix(root.as_ref())?;
    key.starts_with('/').then(|| key.to_string())
}
