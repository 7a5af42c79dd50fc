//! HTTP request handlers for the thumbkey image API.
//!
//! # Endpoints
//!
//! - `GET /{key}` - Serve a cached or freshly derived image
//! - `POST /{key}` - Upload a new source image
//! - `PUT /{key}` - Upload or replace a source image
//! - `DELETE /{key}` - Delete a source image and its derived images
//! - `GET /health` - Health check endpoint
//!
//! With several sources configured, `{key}` starts with the source name.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{ParseError, ServiceError};
use crate::service::{Resolver, SourceMap};

/// Header reporting whether a GET was answered from the cache store.
pub const CACHE_HIT_HEADER: &str = "x-cache-hit";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Configured sources
    pub sources: SourceMap,

    /// Include error details in response bodies
    pub expose_errors: bool,
}

impl AppState {
    pub fn new(sources: SourceMap) -> Self {
        Self {
            sources,
            expose_errors: false,
        }
    }

    /// Include the underlying error message in error responses.
    pub fn with_expose_errors(mut self, enabled: bool) -> Self {
        self.expose_errors = enabled;
        self
    }

    fn route<'a>(&self, path: &'a str) -> Result<(Arc<Resolver>, &'a str), HandlerError> {
        self.sources.route(path).ok_or_else(|| {
            self.error(ServiceError::FileNotFound(format!(
                "no source configured for '{}'",
                path
            )))
        })
    }

    fn error(&self, error: ServiceError) -> HandlerError {
        HandlerError {
            error,
            expose: self.expose_errors,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "file_not_found", "conflict")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Response body for source mutations.
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    /// Source key that was written or deleted
    pub key: String,

    /// Derived images removed from the cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidated: Option<usize>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Handler error rendered as a JSON [`ErrorResponse`].
///
/// 5xx errors are logged at ERROR, 404s at DEBUG and other 4xx at WARN.
/// Unless `expose` is set, the message is the canonical status reason.
#[derive(Debug)]
pub struct HandlerError {
    pub error: ServiceError,
    pub expose: bool,
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let error_type = self.error.error_type();
        let message = self.error.to_string();

        if status.is_server_error() {
            error!(error_type, status = status.as_u16(), "Server error: {}", message);
        } else if status == StatusCode::NOT_FOUND {
            debug!(error_type, status = status.as_u16(), "Resource not found: {}", message);
        } else {
            warn!(error_type, status = status.as_u16(), "Client error: {}", message);
        }

        let message = if self.expose {
            message
        } else {
            status.canonical_reason().unwrap_or("Error").to_string()
        };

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle image requests.
///
/// # Endpoint
///
/// `GET /{key}`, e.g. `/photos/cat_s150x150_q60.jpg`
///
/// # Response
///
/// - `200 OK`: Served from the cache, or generated without a cache write
/// - `201 Created`: Generated and written to the cache
/// - `400 Bad Request`: Malformed key or processing tokens
/// - `404 Not Found`: Source image not found
/// - `500 Internal Server Error`: Processing or storage error
/// - `502 Bad Gateway`: Remote backend failure
///
/// # Headers
///
/// - `Content-Type`: MIME type of the image
/// - `X-Cache-Hit: true|false`
pub async fn image_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, HandlerError> {
    let path = format!("/{}", key);
    let (resolver, key) = state.route(&path)?;
    let resolved = resolver.get(key).await.map_err(|e| state.error(e))?;

    let content_type = HeaderValue::from_str(&resolved.artifact.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        HeaderName::from_static(CACHE_HIT_HEADER),
        HeaderValue::from_static(if resolved.status.is_hit() { "true" } else { "false" }),
    );

    Ok((
        resolved.status.status_code(),
        headers,
        Body::from(resolved.artifact.data),
    )
        .into_response())
}

/// Handle source uploads.
///
/// `POST /{key}` with the image as the request body.
///
/// - `201 Created`: Source stored
/// - `400 Bad Request`: Malformed key, or the key carries processing tokens
/// - `405 Method Not Allowed`: Source backend is read-only
/// - `409 Conflict`: Source already exists
/// - `415 Unsupported Media Type`: Body is not a JPEG/PNG matching the key
pub async fn create_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Response, HandlerError> {
    let path = format!("/{}", key);
    let (resolver, key) = state.route(&path)?;
    resolver
        .create(key, body)
        .await
        .map_err(|e| state.error(e))?;

    Ok((
        StatusCode::CREATED,
        Json(MutationResponse {
            key: key.to_string(),
            invalidated: None,
        }),
    )
        .into_response())
}

/// Handle source replacement.
///
/// `PUT /{key}` stores the body (creating or replacing the source) and
/// deletes every derived image of the key. Answers `201 Created`.
pub async fn replace_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Response, HandlerError> {
    let path = format!("/{}", key);
    let (resolver, key) = state.route(&path)?;
    let removed = resolver
        .replace(key, body)
        .await
        .map_err(|e| state.error(e))?;

    Ok((
        StatusCode::CREATED,
        Json(MutationResponse {
            key: key.to_string(),
            invalidated: Some(removed),
        }),
    )
        .into_response())
}

/// Handle source deletion.
///
/// `DELETE /{key}` removes the source and its derived images.
/// Answers `200 OK`, or `404 Not Found` when the source is absent.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<MutationResponse>, HandlerError> {
    let path = format!("/{}", key);
    let (resolver, key) = state.route(&path)?;
    let removed = resolver.delete(key).await.map_err(|e| state.error(e))?;

    Ok(Json(MutationResponse {
        key: key.to_string(),
        invalidated: Some(removed),
    }))
}

/// Any method on `/` names no image.
pub async fn empty_key_handler(State(state): State<AppState>) -> HandlerError {
    state.error(ParseError::EmptyKey.into())
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
