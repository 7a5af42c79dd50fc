//! End-to-end tests against an in-process WebDAV server.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::Router;
use thumbkey::storage::{ImageStore, RetryPolicy, WebDavStore};

use super::test_utils::{create_jpeg, get, image_size, resolver, router, send, MockDav};

const TOKEN: &str = "dav-token";

fn dav_store(server: &MockDav, token: &str) -> WebDavStore {
    WebDavStore::new(
        reqwest::Client::new(),
        server.endpoint(),
        token,
        RetryPolicy::none(),
    )
}

async fn dav_app() -> (Router, MockDav, MockDav) {
    let source = MockDav::start(TOKEN).await;
    let cache = MockDav::start(TOKEN).await;
    let router = router(vec![resolver(
        "default",
        Arc::new(dav_store(&source, TOKEN)),
        Arc::new(dav_store(&cache, TOKEN)),
    )]);
    (router, source, cache)
}

#[tokio::test]
async fn test_get_derives_into_nested_cache_collection() {
    let (router, source, cache) = dav_app().await;
    source.insert("/dav/photos/2024/sea.jpg", create_jpeg(120, 80), "image/jpeg");

    let response = get(&router, "/photos/2024/sea_60x40.jpg").await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(image_size(&response.body), (60, 40));
    assert!(cache.has_collection("/dav/photos/"));
    assert!(cache.has_collection("/dav/photos/2024/"));
    assert_eq!(
        cache.file("/dav/photos/2024/sea_60x40.jpg"),
        Some(response.body.clone())
    );

    let again = get(&router, "/photos/2024/sea_60x40.jpg").await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.body, response.body);
}

#[tokio::test]
async fn test_post_creates_collections_then_conflicts() {
    let (router, source, _cache) = dav_app().await;
    let jpeg = create_jpeg(20, 20);

    let created = send(&router, Method::POST, "/uploads/new/pic.jpg", jpeg.clone()).await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(
        source.file("/dav/uploads/new/pic.jpg").map(|b| b.to_vec()),
        Some(jpeg.clone())
    );

    let methods: Vec<String> = source.requests().into_iter().map(|(m, _)| m).collect();
    assert_eq!(methods, ["HEAD", "PUT", "MKCOL", "MKCOL", "PUT"]);

    let again = send(&router, Method::POST, "/uploads/new/pic.jpg", jpeg).await;
    assert_eq!(again.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delete_invalidates_via_propfind() {
    let (router, source, cache) = dav_app().await;
    source.insert("/dav/gallery/cat.jpg", create_jpeg(50, 50), "image/jpeg");

    assert_eq!(get(&router, "/gallery/cat_10x10.jpg").await.status, StatusCode::CREATED);
    assert_eq!(get(&router, "/gallery/cat_20x20.jpg").await.status, StatusCode::CREATED);
    cache.insert("/dav/gallery/dog_10x10.jpg", create_jpeg(10, 10), "image/jpeg");

    let response = send(&router, Method::DELETE, "/gallery/cat.jpg", "").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["invalidated"], 2);
    assert!(source.file("/dav/gallery/cat.jpg").is_none());
    assert!(cache.file("/dav/gallery/cat_10x10.jpg").is_none());
    assert!(cache.file("/dav/gallery/cat_20x20.jpg").is_none());
    assert!(cache.file("/dav/gallery/dog_10x10.jpg").is_some());
}

#[tokio::test]
async fn test_delete_with_missing_cache_collection() {
    let (router, source, _cache) = dav_app().await;
    source.insert("/dav/lonely/one.jpg", create_jpeg(10, 10), "image/jpeg");

    let response = send(&router, Method::DELETE, "/lonely/one.jpg", "").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["invalidated"], 0);
}

#[tokio::test]
async fn test_missing_source_returns_404() {
    let (router, _source, _cache) = dav_app().await;

    assert_eq!(get(&router, "/nope_10x10.jpg").await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        send(&router, Method::DELETE, "/nope.jpg", "").await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_rejected_credentials_surface_as_bad_gateway() {
    let server = MockDav::start(TOKEN).await;
    server.insert("/dav/a.jpg", create_jpeg(10, 10), "image/jpeg");
    let store = dav_store(&server, "wrong-token");

    let err = store.get("/a.jpg").await.unwrap_err();
    assert!(!err.is_transient());

    let router = router(vec![resolver(
        "default",
        Arc::new(store),
        Arc::new(thumbkey::storage::MemoryStore::new()),
    )]);
    assert_eq!(get(&router, "/a.jpg").await.status, StatusCode::BAD_GATEWAY);
}
