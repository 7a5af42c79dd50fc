//! Router configuration for thumbkey.
//!
//! # Route Structure
//!
//! ```text
//! /health        - Health check
//! /              - 400 (empty key)
//! /{*key}        - GET derives, POST creates, PUT replaces, DELETE removes
//! ```
//!
//! # Example
//!
//! ```ignore
//! use thumbkey::server::{create_router, RouterConfig};
//! use thumbkey::service::{build_resolvers, SourceMap};
//!
//! let resolvers = build_resolvers(&descriptors, &RetryPolicy::default()).await?;
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://app.example.org".to_string()])
//!     .with_max_upload_bytes(5 * 1024 * 1024);
//!
//! let router = create_router(SourceMap::new(resolvers), config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::Router;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_handler, delete_handler, empty_key_handler, health_handler, image_handler,
    replace_handler, AppState, CACHE_HIT_HEADER,
};
use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::service::SourceMap;

// =============================================================================
// Router Configuration
// =============================================================================

/// HTTP surface settings, separate from the source descriptors.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Browser origins allowed to call the API; `None` allows all
    pub cors_origins: Option<Vec<String>>,

    /// Maximum accepted upload body size in bytes
    pub max_upload_bytes: usize,

    /// Include error details in response bodies
    pub expose_errors: bool,

    /// Wrap the router in a `TraceLayer`
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a router configuration.
    ///
    /// By default:
    /// - Any origin may call the API
    /// - Uploads are limited to 20MB
    /// - Error responses carry only the status reason
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            expose_errors: false,
            enable_tracing: true,
        }
    }

    /// Restrict cross-origin access to `origins`. An empty list (or one with
    /// no parseable origin) disables CORS responses entirely.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Set the maximum upload body size.
    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Include error details in response bodies.
    pub fn with_expose_errors(mut self, enabled: bool) -> Self {
        self.expose_errors = enabled;
        self
    }

    /// Toggle the request `TraceLayer`.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
///
/// `/health` takes priority over the image wildcard, so an image key can
/// never be `health`. Unsupported methods on an image key answer 405.
pub fn create_router(sources: SourceMap, config: RouterConfig) -> Router {
    let app_state = AppState::new(sources).with_expose_errors(config.expose_errors);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/", any(empty_key_handler))
        .route(
            "/{*key}",
            get(image_handler)
                .post(create_handler)
                .put(replace_handler)
                .delete(delete_handler),
        )
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// CORS for browser clients. Uploads need `Content-Type`, and scripts may
/// read the cache header on responses.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, CONTENT_LENGTH])
        .expose_headers([HeaderName::from_static(CACHE_HIT_HEADER)])
        .max_age(Duration::from_secs(60 * 60));

    let Some(origins) = &config.cors_origins else {
        return base.allow_origin(Any);
    };
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    if allowed.is_empty() {
        base
    } else {
        base.allow_origin(allowed)
    }
}

// =============================================================================
// Tests
// =============================================================================
