//! Test utilities for integration tests.
//!
//! This module provides image fixtures, a request-counting store wrapper,
//! router helpers, and in-process mock servers for the WebDAV and tile API
//! backends.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, IF_NONE_MATCH};
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tower::ServiceExt;
use url::Url;

use thumbkey::error::StoreError;
use thumbkey::key::ThumbnailMask;
use thumbkey::storage::{ImageArtifact, ImageStore, MemoryStore, WriteMode};
use thumbkey::transform::{RasterEngine, TokenRegistry};
use thumbkey::{create_router, Resolver, RouterConfig, SourceMap};

// =============================================================================
// Image Fixtures
// =============================================================================

/// Create a JPEG with a gradient so resizes produce distinct output.
pub fn create_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 90)
        .encode_image(&img)
        .unwrap();
    buf
}

/// Create a solid-colour PNG.
pub fn create_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([40, 80, 120]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Check if data is a valid JPEG (SOI and EOI markers).
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..2] == [0xFF, 0xD8] && data[data.len() - 2..] == [0xFF, 0xD9]
}

/// Check if data starts with the PNG signature.
pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
}

/// Decode an image and return its dimensions.
pub fn image_size(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).unwrap();
    (img.width(), img.height())
}

// =============================================================================
// Tracking Store
// =============================================================================

/// A memory store that counts `get` and `put` calls.
///
/// This is useful for verifying cache behavior and request patterns.
#[derive(Clone, Default)]
pub struct TrackingStore {
    inner: Arc<MemoryStore>,
    gets: Arc<AtomicUsize>,
    puts: Arc<AtomicUsize>,
}

impl TrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_image(self, key: &str, data: Vec<u8>) -> Self {
        self.inner
            .put(key, &ImageArtifact::for_key(key, data), WriteMode::Overwrite)
            .await
            .unwrap();
        self
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.keys().await
    }
}

#[async_trait]
impl ImageStore for TrackingStore {
    fn backend(&self) -> &'static str {
        "tracking"
    }

    async fn get(&self, key: &str) -> Result<ImageArtifact, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    async fn put(
        &self,
        key: &str,
        artifact: &ImageArtifact,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, artifact, mode).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    async fn delete_matching(&self, mask: &ThumbnailMask) -> Result<usize, StoreError> {
        self.inner.delete_matching(mask).await
    }
}

// =============================================================================
// Router Helpers
// =============================================================================

/// Build a resolver with the raster engine and default token registry.
pub fn resolver(
    name: &str,
    source: Arc<dyn ImageStore>,
    cache: Arc<dyn ImageStore>,
) -> Resolver {
    Resolver::new(
        name,
        source,
        cache,
        Arc::new(RasterEngine::new()),
        Arc::new(TokenRegistry::default()),
    )
}

/// Router over the given resolvers, with error details exposed.
pub fn router(resolvers: Vec<Resolver>) -> Router {
    create_router(
        SourceMap::new(resolvers),
        RouterConfig::new()
            .with_tracing(false)
            .with_expose_errors(true),
    )
}

/// A source/cache pair of tracking stores behind a single-source router.
pub struct TestApp {
    pub router: Router,
    pub source: TrackingStore,
    pub cache: TrackingStore,
}

impl TestApp {
    pub fn new(source: TrackingStore) -> Self {
        let cache = TrackingStore::new();
        let router = router(vec![resolver(
            "default",
            Arc::new(source.clone()),
            Arc::new(cache.clone()),
        )]);
        Self {
            router,
            source,
            cache,
        }
    }
}

/// Response parts collected for assertions.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Send one request through the router.
pub async fn send(router: &Router, method: Method, uri: &str, body: impl Into<Body>) -> TestResponse {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    send(router, Method::GET, uri, Body::empty()).await
}

// =============================================================================
// Mock Servers
// =============================================================================

/// Serve `app` on an ephemeral local port.
async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn parent_collection(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..=idx],
        None => "/",
    }
}

/// State of the mock WebDAV server.
pub struct DavState {
    token: String,
    files: Mutex<HashMap<String, (Bytes, String)>>,
    collections: Mutex<HashSet<String>>,
    requests: Mutex<Vec<(String, String)>>,
}

/// In-process WebDAV server.
///
/// Supports GET, HEAD, PUT (409 on a missing parent, 412 for
/// `If-None-Match: *` on an existing file), MKCOL, DELETE and depth-1
/// PROPFIND. Requests without `Authorization: OAuth <token>` get 401.
pub struct MockDav {
    pub addr: SocketAddr,
    pub state: Arc<DavState>,
}

impl MockDav {
    /// Start a server whose root collection is `/dav/`.
    pub async fn start(token: &str) -> Self {
        let state = Arc::new(DavState {
            token: token.to_string(),
            files: Mutex::new(HashMap::new()),
            collections: Mutex::new(HashSet::from(["/".to_string(), "/dav/".to_string()])),
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new().fallback(dav_handler).with_state(state.clone());
        let addr = spawn_server(app).await;
        Self { addr, state }
    }

    pub fn endpoint(&self) -> Url {
        Url::parse(&format!("http://{}/dav", self.addr)).unwrap()
    }

    /// Store a file, creating its collections.
    pub fn insert(&self, path: &str, data: Vec<u8>, content_type: &str) {
        let mut collections = self.state.collections.lock().unwrap();
        let mut dir = parent_collection(path);
        while dir != "/" {
            collections.insert(dir.to_string());
            dir = parent_collection(dir);
        }
        self.state
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), (Bytes::from(data), content_type.to_string()));
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.state
            .files
            .lock()
            .unwrap()
            .get(path)
            .map(|(data, _)| data.clone())
    }

    pub fn has_collection(&self, path: &str) -> bool {
        self.state.collections.lock().unwrap().contains(path)
    }

    /// Methods received, in order, as `(method, path)`.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn dav_handler(
    State(state): State<Arc<DavState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    state
        .requests
        .lock()
        .unwrap()
        .push((method.to_string(), path.clone()));

    let expected = format!("OAuth {}", state.token);
    if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match method.as_str() {
        "GET" | "HEAD" => match state.files.lock().unwrap().get(&path) {
            Some((data, content_type)) => {
                ([(CONTENT_TYPE, content_type.clone())], data.clone()).into_response()
            }
            None => StatusCode::NOT_FOUND.into_response(),
        },
        "PUT" => {
            if !state
                .collections
                .lock()
                .unwrap()
                .contains(parent_collection(&path))
            {
                return StatusCode::CONFLICT.into_response();
            }
            let mut files = state.files.lock().unwrap();
            if headers.contains_key(IF_NONE_MATCH) && files.contains_key(&path) {
                return StatusCode::PRECONDITION_FAILED.into_response();
            }
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            match files.insert(path, (body, content_type)) {
                Some(_) => StatusCode::NO_CONTENT.into_response(),
                None => StatusCode::CREATED.into_response(),
            }
        }
        "MKCOL" => {
            let mut collections = state.collections.lock().unwrap();
            if collections.contains(&path) {
                return StatusCode::METHOD_NOT_ALLOWED.into_response();
            }
            if !collections.contains(parent_collection(&path)) {
                return StatusCode::CONFLICT.into_response();
            }
            collections.insert(path);
            StatusCode::CREATED.into_response()
        }
        "DELETE" => match state.files.lock().unwrap().remove(&path) {
            Some(_) => StatusCode::NO_CONTENT.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        "PROPFIND" => {
            let dir = if path.ends_with('/') {
                path
            } else {
                format!("{}/", path)
            };
            if !state.collections.lock().unwrap().contains(&dir) {
                return StatusCode::NOT_FOUND.into_response();
            }

            let mut hrefs = vec![dir.clone()];
            hrefs.extend(
                state
                    .files
                    .lock()
                    .unwrap()
                    .keys()
                    .filter(|file| parent_collection(file) == dir)
                    .cloned(),
            );
            hrefs.extend(
                state
                    .collections
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|c| *c != &dir && parent_collection(c) == dir)
                    .cloned(),
            );

            let responses: String = hrefs
                .iter()
                .map(|href| format!("<d:response><d:href>{}</d:href></d:response>", href))
                .collect();
            let body = format!(
                r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:">{}</d:multistatus>"#,
                responses
            );
            (
                StatusCode::MULTI_STATUS,
                [(CONTENT_TYPE, "application/xml; charset=utf-8")],
                body,
            )
                .into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// State of the mock tile API.
pub struct TileApiState {
    api_key: String,
    tiles: Mutex<HashMap<String, Bytes>>,
    failure: Mutex<Option<StatusCode>>,
    hits: AtomicUsize,
}

/// In-process map tile API serving `/v1/{z}/{x}/{y}.png`.
///
/// Requests without the right `apikey` query parameter get 403.
pub struct MockTileApi {
    pub addr: SocketAddr,
    pub state: Arc<TileApiState>,
}

impl MockTileApi {
    pub async fn start(api_key: &str) -> Self {
        let state = Arc::new(TileApiState {
            api_key: api_key.to_string(),
            tiles: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            hits: AtomicUsize::new(0),
        });
        let app = Router::new().fallback(tile_handler).with_state(state.clone());
        let addr = spawn_server(app).await;
        Self { addr, state }
    }

    pub fn url_template(&self) -> String {
        format!("http://{}/v1/{{z}}/{{x}}/{{y}}.{{ext}}", self.addr)
    }

    pub fn insert(&self, path: &str, data: Vec<u8>) {
        self.state
            .tiles
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::from(data));
    }

    /// Answer every request with `status` from now on.
    pub fn fail_with(&self, status: StatusCode) {
        *self.state.failure.lock().unwrap() = Some(status);
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn tile_handler(State(state): State<Arc<TileApiState>>, uri: Uri) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    if let Some(status) = *state.failure.lock().unwrap() {
        return status.into_response();
    }

    let expected = format!("apikey={}", state.api_key);
    if uri.query() != Some(expected.as_str()) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.tiles.lock().unwrap().get(uri.path()) {
        Some(data) => ([(CONTENT_TYPE, "image/png")], data.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
