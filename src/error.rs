use http::StatusCode;
use thiserror::Error;

/// Errors raised while parsing a request key or its processing configuration.
///
/// Every variant is a caller input error and maps to HTTP 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The request path was empty or only `/`
    #[error("Empty image key")]
    EmptyKey,

    /// The source key failed validation
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// The key does not end with a supported image extension
    #[error("Unsupported image extension in '{0}' (expected jpg, jpeg or png)")]
    UnsupportedExtension(String),

    /// A token was claimed by a builder but violates its grammar
    #[error("Invalid token '{token}': {reason}")]
    InvalidToken { token: String, reason: String },

    /// No builder and no save option accepted the token
    #[error("Unrecognized token '{0}'")]
    UnrecognizedToken(String),
}

/// Errors returned by image stores (sources and caches).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The key does not exist in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// A create was requested for a key that already exists
    #[error("Already exists: {0}")]
    Conflict(String),

    /// The backend does not support this operation
    #[error("Operation '{operation}' is not allowed on {backend} backend")]
    NotAllowed {
        backend: &'static str,
        operation: &'static str,
    },

    /// The key cannot be translated into a backend request
    #[error("Invalid key for backend: {0}")]
    InvalidKey(String),

    /// A remote backend answered with a non-2xx status or could not be reached
    #[error("Upstream error: {message}")]
    Upstream { status: Option<u16>, message: String },

    /// Local I/O failure
    #[error("File operation failed: {0}")]
    Operation(String),
}

impl StoreError {
    /// Whether a retry of the same request might succeed.
    ///
    /// Only upstream transport failures and 5xx answers qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Upstream { status: None, .. } => true,
            StoreError::Upstream {
                status: Some(code), ..
            } => *code >= 500,
            _ => false,
        }
    }

    pub(crate) fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = match status {
            Some(code) => format!("status {}: {}", code, message.into()),
            None => message.into(),
        };
        StoreError::Upstream { status, message }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(err.to_string())
        } else {
            StoreError::Operation(err.to_string())
        }
    }
}

/// Errors raised by the processing engine.
#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    /// Source bytes could not be decoded
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// The transformed image could not be encoded
    #[error("Failed to encode image: {0}")]
    Encode(String),

    /// A crop or resize had no valid pixels
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A resize step would produce an image larger than allowed
    #[error("Image too large: {0}")]
    LimitExceeded(String),

    /// The blocking processing task panicked or was cancelled
    #[error("Processing task failed: {0}")]
    Task(String),
}

/// Top-level error kinds surfaced at the HTTP boundary.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Grammar, token or validation failure (400)
    #[error("{0}")]
    InvalidRequestValue(String),

    /// Source or cache entry absent when required (404)
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Upload body is not a supported image (415)
    #[error("Invalid media type: {0}")]
    InvalidMediaType(String),

    /// POST to an existing source (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Mutation attempted on a read-only backend (405)
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// Remote backend failure (502)
    #[error("Bad upstream response: {0}")]
    BadUpstreamResponse(String),

    /// Local I/O failure (500)
    #[error("File operation failed: {0}")]
    FileOperation(String),

    /// Decoding, transformation or encoding failure (500)
    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

impl ServiceError {
    /// HTTP status code for this error kind.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidRequestValue(_)
            | ServiceError::Processing(ProcessingError::LimitExceeded(_)) => StatusCode::BAD_REQUEST,
            ServiceError::FileNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::NotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ServiceError::BadUpstreamResponse(_) => StatusCode::BAD_GATEWAY,
            ServiceError::FileOperation(_) | ServiceError::Processing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable identifier used in JSON error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServiceError::InvalidRequestValue(_) => "invalid_request_value",
            ServiceError::FileNotFound(_) => "file_not_found",
            ServiceError::InvalidMediaType(_) => "invalid_media_type",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::NotAllowed(_) => "not_allowed",
            ServiceError::BadUpstreamResponse(_) => "bad_upstream_response",
            ServiceError::FileOperation(_) => "file_operation",
            ServiceError::Processing(ProcessingError::LimitExceeded(_)) => "limit_exceeded",
            ServiceError::Processing(_) => "processing_error",
        }
    }
}

impl From<ParseError> for ServiceError {
    fn from(err: ParseError) -> Self {
        ServiceError::InvalidRequestValue(err.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => ServiceError::FileNotFound(key),
            StoreError::Conflict(key) => ServiceError::Conflict(key),
            e @ StoreError::NotAllowed { .. } => ServiceError::NotAllowed(e.to_string()),
            StoreError::InvalidKey(msg) => ServiceError::InvalidRequestValue(msg),
            e @ StoreError::Upstream { .. } => ServiceError::BadUpstreamResponse(e.to_string()),
            StoreError::Operation(msg) => ServiceError::FileOperation(msg),
        }
    }
}

/// Errors raised while loading source descriptors at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The descriptor file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The descriptor file is not valid JSON or names an unknown backend
    #[error("Invalid source descriptors: {0}")]
    Parse(#[from] serde_json::Error),

    /// A descriptor is structurally valid but unusable
    #[error("Invalid source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },

    /// A backend could not be constructed
    #[error("Failed to initialize source '{name}': {reason}")]
    Backend { name: String, reason: String },
}
