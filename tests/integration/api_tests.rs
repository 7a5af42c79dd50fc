//! HTTP API tests against in-memory stores.
//!
//! These tests drive the full router: key parsing, resolution, status codes,
//! headers and JSON error bodies.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use thumbkey::storage::MemoryStore;
use thumbkey::{create_router, RouterConfig, SourceMap};

use super::test_utils::{
    create_jpeg, create_png, get, image_size, is_valid_jpeg, is_valid_png, resolver, router,
    send, TestApp, TrackingStore,
};

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new(TrackingStore::new());

    let response = get(&app.router, "/health").await;

    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// GET Resolution
// =============================================================================

#[tokio::test]
async fn test_get_missing_source_returns_404() {
    let app = TestApp::new(TrackingStore::new());

    let response = get(&app.router, "/nonexistent.jpg").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "file_not_found");
    assert!(app.cache.keys().await.is_empty());
}

#[tokio::test]
async fn test_get_original_is_cached_on_first_request() {
    let original = create_jpeg(64, 48);
    let source = TrackingStore::new()
        .with_image("/photo.jpg", original.clone())
        .await;
    let app = TestApp::new(source);

    let first = get(&app.router, "/photo.jpg").await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(first.header("content-type"), Some("image/jpeg"));
    assert_eq!(first.header("x-cache-hit"), Some("false"));
    assert_eq!(first.body.as_ref(), original.as_slice());

    let second = get(&app.router, "/photo.jpg").await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-cache-hit"), Some("true"));
    assert_eq!(second.body.as_ref(), original.as_slice());

    assert_eq!(app.source.get_count(), 1);
}

#[tokio::test]
async fn test_get_nested_thumbnail_with_quality() {
    let source = TrackingStore::new()
        .with_image("/sub/dir/image.jpg", create_jpeg(400, 300))
        .await;
    let app = TestApp::new(source);

    let first = get(&app.router, "/sub/dir/image_s150x150_q60.jpg").await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert!(is_valid_jpeg(&first.body));
    assert_eq!(image_size(&first.body), (150, 150));

    let second = get(&app.router, "/sub/dir/image_s150x150_q60.jpg").await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body, first.body);

    assert_eq!(
        app.cache.keys().await,
        vec!["/sub/dir/image_s150x150_q60.jpg".to_string()]
    );
    assert_eq!(app.source.get_count(), 1);
}

#[tokio::test]
async fn test_get_preserve_width_keeps_aspect_ratio() {
    let source = TrackingStore::new()
        .with_image("/wide.jpg", create_jpeg(200, 100))
        .await;
    let app = TestApp::new(source);

    let response = get(&app.router, "/wide_100w.jpg").await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(image_size(&response.body), (100, 50));
}

#[tokio::test]
async fn test_get_png_thumbnail_keeps_format() {
    let source = TrackingStore::new()
        .with_image("/icon.png", create_png(80, 80))
        .await;
    let app = TestApp::new(source);

    let response = get(&app.router, "/icon_40x40.png").await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert!(is_valid_png(&response.body));
    assert_eq!(image_size(&response.body), (40, 40));
}

#[tokio::test]
async fn test_get_thumbnail_of_missing_source_returns_404() {
    let app = TestApp::new(TrackingStore::new());

    let response = get(&app.router, "/ghost_100x100.jpg").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(app.cache.keys().await.is_empty());
}

#[tokio::test]
async fn test_get_corrupt_source_returns_500() {
    let source = TrackingStore::new()
        .with_image("/broken.jpg", vec![0xFF, 0xD8, 0x00, 0x01, 0x02])
        .await;
    let app = TestApp::new(source);

    let response = get(&app.router, "/broken_100x100.jpg").await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["error"], "processing_error");
    assert!(app.cache.keys().await.is_empty());
}

// =============================================================================
// Key Grammar Errors
// =============================================================================

#[tokio::test]
async fn test_unsupported_extension_returns_400() {
    let app = TestApp::new(TrackingStore::new());

    let response = get(&app.router, "/index.php").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_request_value");
    assert_eq!(app.source.get_count(), 0);
}

#[tokio::test]
async fn test_malformed_tokens_return_400() {
    let source = TrackingStore::new()
        .with_image("/image.jpg", create_jpeg(32, 32))
        .await;
    let app = TestApp::new(source);

    for uri in [
        "/image_100x15i.jpg",
        "/image_100x.jpg",
        "/image_q0.jpg",
        "/image_zz.jpg",
        "/image_.jpg",
        "/image_4294967295x4294967295.jpg",
        "/image_8193x10.jpg",
    ] {
        let response = get(&app.router, uri).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "uri {}", uri);
    }

    assert_eq!(app.source.get_count(), 0);
}

#[tokio::test]
async fn test_oversized_stretch_returns_400() {
    let source = TrackingStore::new()
        .with_image("/tall.jpg", create_jpeg(4, 400))
        .await;
    let app = TestApp::new(source);

    let response = get(&app.router, "/tall_8192x1.jpg").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "limit_exceeded");
    assert!(app.cache.keys().await.is_empty());
}

#[tokio::test]
async fn test_root_path_returns_400() {
    let app = TestApp::new(TrackingStore::new());

    let response = get(&app.router, "/").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unsupported_method_returns_405() {
    let app = TestApp::new(TrackingStore::new());

    let response = send(&app.router, Method::PATCH, "/photo.jpg", Body::empty()).await;

    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// POST / DELETE Flow
// =============================================================================

#[tokio::test]
async fn test_post_then_post_again_conflicts() {
    let app = TestApp::new(TrackingStore::new());
    let jpeg = create_jpeg(32, 32);

    let first = send(&app.router, Method::POST, "/new.jpg", jpeg.clone()).await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(first.json()["key"], "/new.jpg");

    let second = send(&app.router, Method::POST, "/new.jpg", jpeg).await;
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(second.json()["error"], "conflict");
}

#[tokio::test]
async fn test_post_then_get_derived() {
    let app = TestApp::new(TrackingStore::new());

    let created = send(&app.router, Method::POST, "/upload.jpg", create_jpeg(120, 60)).await;
    assert_eq!(created.status, StatusCode::CREATED);

    let thumb = get(&app.router, "/upload_60w.jpg").await;
    assert_eq!(thumb.status, StatusCode::CREATED);
    assert_eq!(image_size(&thumb.body), (60, 30));
}

#[tokio::test]
async fn test_post_non_image_returns_415() {
    let app = TestApp::new(TrackingStore::new());

    let response = send(&app.router, Method::POST, "/note.jpg", "plain text").await;

    assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(response.json()["error"], "invalid_media_type");
    assert!(app.source.keys().await.is_empty());
}

#[tokio::test]
async fn test_post_mismatched_format_returns_415() {
    let app = TestApp::new(TrackingStore::new());

    let response = send(&app.router, Method::POST, "/image.jpg", create_png(8, 8)).await;

    assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_post_empty_body_returns_415() {
    let app = TestApp::new(TrackingStore::new());

    let response = send(&app.router, Method::POST, "/image.jpg", Body::empty()).await;

    assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_delete_removes_source_and_derived() {
    let source = TrackingStore::new()
        .with_image("/a.jpg", create_jpeg(200, 200))
        .await;
    let app = TestApp::new(source);

    assert_eq!(get(&app.router, "/a_100x100.jpg").await.status, StatusCode::CREATED);
    assert_eq!(get(&app.router, "/a.jpg").await.status, StatusCode::CREATED);

    let deleted = send(&app.router, Method::DELETE, "/a.jpg", Body::empty()).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.json()["invalidated"], 2);

    assert_eq!(get(&app.router, "/a.jpg").await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        get(&app.router, "/a_100x100.jpg").await.status,
        StatusCode::NOT_FOUND
    );
    assert!(app.cache.keys().await.is_empty());
}

#[tokio::test]
async fn test_delete_missing_source_returns_404() {
    let app = TestApp::new(TrackingStore::new());

    let response = send(&app.router, Method::DELETE, "/missing.jpg", Body::empty()).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Routing and Error Exposure
// =============================================================================

#[tokio::test]
async fn test_multi_source_routing_by_first_segment() {
    let photos_source = Arc::new(MemoryStore::new());
    let maps_source = Arc::new(MemoryStore::new());
    let router = router(vec![
        resolver("photos", photos_source.clone(), Arc::new(MemoryStore::new())),
        resolver("maps", maps_source.clone(), Arc::new(MemoryStore::new())),
    ]);

    let created = send(&router, Method::POST, "/photos/cat.jpg", create_jpeg(40, 40)).await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.json()["key"], "/cat.jpg");

    assert_eq!(photos_source.keys().await, vec!["/cat.jpg".to_string()]);
    assert!(maps_source.is_empty().await);

    assert_eq!(get(&router, "/photos/cat_20.jpg").await.status, StatusCode::CREATED);
    assert_eq!(get(&router, "/maps/cat_20.jpg").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&router, "/unknown/cat.jpg").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_details_hidden_by_default() {
    let router = create_router(
        SourceMap::new(vec![resolver(
            "default",
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        )]),
        RouterConfig::new().with_tracing(false),
    );

    let response = get(&router, "/secret/path/missing.jpg").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let json = response.json();
    assert_eq!(json["message"], "Not Found");
    assert_eq!(json["status"], 404);
    assert!(!response.body.windows(6).any(|w| w == b"secret"));
}

#[tokio::test]
async fn test_error_details_exposed_in_debug() {
    let app = TestApp::new(TrackingStore::new());

    let response = get(&app.router, "/image_100x15i.jpg").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let message = response.json()["message"].as_str().unwrap().to_string();
    assert!(message.contains("100x15i"), "message: {}", message);
}
