//! Source replacement and invalidation tests.

use axum::http::{Method, StatusCode};

use super::test_utils::{create_jpeg, create_png, get, image_size, send, TestApp, TrackingStore};

#[tokio::test]
async fn test_put_replaces_source_and_invalidates_thumbnails() {
    let source = TrackingStore::new()
        .with_image("/pics/cover.jpg", create_jpeg(200, 100))
        .await;
    let app = TestApp::new(source);

    let before = get(&app.router, "/pics/cover_50w.jpg").await;
    assert_eq!(before.status, StatusCode::CREATED);
    assert_eq!(image_size(&before.body), (50, 25));
    assert_eq!(
        get(&app.router, "/pics/cover_20x20.jpg").await.status,
        StatusCode::CREATED
    );

    let replaced = send(&app.router, Method::PUT, "/pics/cover.jpg", create_jpeg(100, 100)).await;
    assert_eq!(replaced.status, StatusCode::CREATED);
    assert_eq!(replaced.json()["key"], "/pics/cover.jpg");
    assert_eq!(replaced.json()["invalidated"], 2);
    assert!(app.cache.keys().await.is_empty());

    // regenerated from the new source
    let after = get(&app.router, "/pics/cover_50w.jpg").await;
    assert_eq!(after.status, StatusCode::CREATED);
    assert_eq!(image_size(&after.body), (50, 50));
}

#[tokio::test]
async fn test_put_creates_missing_source() {
    let app = TestApp::new(TrackingStore::new());

    let response = send(&app.router, Method::PUT, "/fresh.png", create_png(10, 10)).await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json()["invalidated"], 0);
    assert_eq!(app.source.keys().await, vec!["/fresh.png".to_string()]);
}

#[tokio::test]
async fn test_invalidation_leaves_sibling_directories_alone() {
    let source = TrackingStore::new()
        .with_image("/a/img.jpg", create_jpeg(40, 40))
        .await
        .with_image("/a/b/img.jpg", create_jpeg(40, 40))
        .await;
    let app = TestApp::new(source);

    assert_eq!(get(&app.router, "/a/img_10x10.jpg").await.status, StatusCode::CREATED);
    assert_eq!(get(&app.router, "/a/b/img_10x10.jpg").await.status, StatusCode::CREATED);

    let deleted = send(&app.router, Method::DELETE, "/a/img.jpg", "").await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.json()["invalidated"], 1);

    assert_eq!(app.cache.keys().await, vec!["/a/b/img_10x10.jpg".to_string()]);
}

#[tokio::test]
async fn test_invalidation_is_scoped_to_extension() {
    let source = TrackingStore::new()
        .with_image("/logo.jpg", create_jpeg(40, 40))
        .await
        .with_image("/logo.png", create_png(40, 40))
        .await;
    let app = TestApp::new(source);

    assert_eq!(get(&app.router, "/logo_10x10.jpg").await.status, StatusCode::CREATED);
    assert_eq!(get(&app.router, "/logo_10x10.png").await.status, StatusCode::CREATED);

    let replaced = send(&app.router, Method::PUT, "/logo.png", create_png(20, 20)).await;
    assert_eq!(replaced.json()["invalidated"], 1);

    assert_eq!(app.cache.keys().await, vec!["/logo_10x10.jpg".to_string()]);
}

#[tokio::test]
async fn test_writes_with_processing_tokens_are_rejected() {
    let source = TrackingStore::new()
        .with_image("/photo.jpg", create_jpeg(20, 20))
        .await;
    let app = TestApp::new(source);

    for method in [Method::POST, Method::PUT] {
        for uri in ["/photo_100x100.jpg", "/photo_.jpg"] {
            let response = send(&app.router, method.clone(), uri, create_jpeg(8, 8)).await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
        }
    }

    let response = send(&app.router, Method::DELETE, "/photo_100x100.jpg", "").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    assert_eq!(app.source.keys().await, vec!["/photo.jpg".to_string()]);
    assert_eq!(app.source.put_count(), 0);
}

#[tokio::test]
async fn test_put_rejects_non_image() {
    let source = TrackingStore::new()
        .with_image("/photo.jpg", create_jpeg(20, 20))
        .await;
    let app = TestApp::new(source);

    let response = send(&app.router, Method::PUT, "/photo.jpg", "not an image").await;

    assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(app.source.put_count(), 0);
}
