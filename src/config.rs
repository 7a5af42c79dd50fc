//! Configuration management for thumbkey.
//!
//! This module provides:
//! - Command-line arguments via clap, with `THUMBKEY_` environment variables
//! - Source descriptors loaded from a JSON file (one per image source)
//! - A single-source shorthand (`--storage-dir`, `--cache-dir`) for the
//!   common filesystem setup
//!
//! # Environment Variables
//!
//! - `THUMBKEY_HOST` - Server bind address (default: 0.0.0.0)
//! - `THUMBKEY_PORT` - Server port (default: 3000)
//! - `THUMBKEY_SOURCES` - Path to a JSON file with source descriptors
//! - `THUMBKEY_STORAGE_DIR` - Source directory for the single-source shorthand
//! - `THUMBKEY_CACHE_DIR` - Cache directory for the single-source shorthand
//! - `THUMBKEY_CACHE_ORIGINALS` - Copy verbatim sources into the cache (default: true)
//! - `THUMBKEY_RETRIES` - Attempts for remote backend operations (default: 3)
//! - `THUMBKEY_MAX_UPLOAD` - Maximum upload size in bytes (default: 20MB)
//! - `THUMBKEY_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `THUMBKEY_DEBUG` - Include error details in responses
//!
//! # Source Descriptor File
//!
//! ```json
//! [
//!   {
//!     "name": "photos",
//!     "source": { "type": "webdav", "endpoint": "https://dav.example.com/photos", "token": "..." },
//!     "cache":  { "type": "filesystem", "storage_directory": "/var/cache/thumbkey/photos" },
//!     "processor": "raster"
//!   },
//!   {
//!     "name": "tiles",
//!     "source": { "type": "remote-api", "url_template": "https://t.example.com/{z}/{x}/{y}.{ext}", "api_key": "..." },
//!     "cache":  { "type": "memory", "capacity_bytes": 67108864 },
//!     "cache_originals": true
//!   }
//! ]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::key::is_valid_directory_name;
use crate::storage::{DEFAULT_MEMORY_CAPACITY, DEFAULT_RETRY_ATTEMPTS};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default maximum upload body size: 20MB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Name given to the source built from the single-source shorthand.
pub const DEFAULT_SOURCE_NAME: &str = "default";

// =============================================================================
// CLI Arguments
// =============================================================================

/// thumbkey - an on-demand image derivation cache.
///
/// Serves resized and re-encoded images addressed by compact URL keys such
/// as `/photos/cat_s150x150_q60.jpg`, generating and caching them on first
/// request.
#[derive(Parser, Debug, Clone)]
#[command(name = "thumbkey")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeConfig),
    /// Validate source descriptors and probe each backend
    Check(CheckConfig),
}

/// Where source descriptors come from. Shared by `serve` and `check`.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// JSON file with an array of source descriptors.
    #[arg(long, env = "THUMBKEY_SOURCES", conflicts_with = "storage_dir")]
    pub sources: Option<PathBuf>,

    /// Source image directory (single filesystem source).
    #[arg(long, env = "THUMBKEY_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Cache directory for the single filesystem source.
    ///
    /// If not specified, derived images are cached in memory.
    #[arg(long, env = "THUMBKEY_CACHE_DIR", requires = "storage_dir")]
    pub cache_dir: Option<PathBuf>,

    /// Copy verbatim source requests into the cache.
    ///
    /// Applies to every source that does not set `cache_originals` itself.
    #[arg(
        long,
        env = "THUMBKEY_CACHE_ORIGINALS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub cache_originals: bool,

    /// Attempts (first try included) for remote backend operations.
    #[arg(long, env = "THUMBKEY_RETRIES", default_value_t = DEFAULT_RETRY_ATTEMPTS)]
    pub retries: usize,
}

impl SourceArgs {
    /// Validate the argument combination.
    pub fn validate(&self) -> Result<(), String> {
        if self.sources.is_none() && self.storage_dir.is_none() {
            return Err(
                "No image source configured. Set --sources (THUMBKEY_SOURCES) \
                 or --storage-dir (THUMBKEY_STORAGE_DIR)"
                    .to_string(),
            );
        }
        if self.retries == 0 {
            return Err("retries must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Load, default and validate the source descriptors.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed (including unknown
    /// backend types) or when any descriptor is invalid.
    pub fn load_sources(&self) -> Result<Vec<SourceDescriptor>, ConfigError> {
        let mut descriptors = match (&self.sources, &self.storage_dir) {
            (Some(path), _) => read_descriptor_file(path)?,
            (None, Some(storage_dir)) => vec![SourceDescriptor {
                name: DEFAULT_SOURCE_NAME.to_string(),
                source: BackendDescriptor::Filesystem {
                    storage_directory: storage_dir.clone(),
                },
                cache: match &self.cache_dir {
                    Some(dir) => BackendDescriptor::Filesystem {
                        storage_directory: dir.clone(),
                    },
                    None => BackendDescriptor::Memory {
                        capacity_bytes: DEFAULT_MEMORY_CAPACITY,
                    },
                },
                processor: ProcessorKind::default(),
                cache_originals: None,
            }],
            (None, None) => Vec::new(),
        };

        for descriptor in &mut descriptors {
            descriptor.cache_originals.get_or_insert(self.cache_originals);
        }
        validate_sources(&descriptors)?;
        Ok(descriptors)
    }
}

/// Configuration for the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "THUMBKEY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "THUMBKEY_PORT")]
    pub port: u16,

    /// Maximum accepted upload body size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "THUMBKEY_MAX_UPLOAD")]
    pub max_upload_bytes: usize,

    // =========================================================================
    // Sources
    // =========================================================================
    #[command(flatten)]
    pub sources: SourceArgs,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "THUMBKEY_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Include error details in response bodies.
    #[arg(long, default_value_t = false, env = "THUMBKEY_DEBUG")]
    pub debug: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.sources.validate()?;

        if self.max_upload_bytes == 0 {
            return Err("max_upload_bytes must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the `check` command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub sources: SourceArgs,

    /// Source key to look up in every source (e.g. `/photos/cat.jpg`).
    #[arg(long)]
    pub test_key: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Source Descriptors
// =============================================================================

/// One configured image source: where originals live, where derived images
/// are cached, and which engine transforms them. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDescriptor {
    /// Route segment for this source (letters, digits, `_`)
    pub name: String,

    /// Backend holding the original images
    pub source: BackendDescriptor,

    /// Backend holding derived artifacts, keyed by full request key
    pub cache: BackendDescriptor,

    /// Processing engine
    #[serde(default)]
    pub processor: ProcessorKind,

    /// Copy verbatim sources into the cache; inherits the CLI default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_originals: Option<bool>,
}

/// Backend selection plus its connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum BackendDescriptor {
    /// Local directory
    Filesystem { storage_directory: PathBuf },

    /// WebDAV collection with OAuth token
    Webdav { endpoint: Url, token: String },

    /// Read-only tile API
    RemoteApi {
        url_template: String,
        #[serde(default)]
        api_key: String,
    },

    /// S3 or S3-compatible bucket
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_region")]
        region: String,
    },

    /// In-process LRU (lost on restart)
    Memory {
        #[serde(default = "default_memory_capacity")]
        capacity_bytes: usize,
    },
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

impl BackendDescriptor {
    /// Backend tag as written in the descriptor file.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendDescriptor::Filesystem { .. } => "filesystem",
            BackendDescriptor::Webdav { .. } => "webdav",
            BackendDescriptor::RemoteApi { .. } => "remote-api",
            BackendDescriptor::S3 { .. } => "s3",
            BackendDescriptor::Memory { .. } => "memory",
        }
    }

    /// Whether the backend accepts writes.
    pub fn is_writable(&self) -> bool {
        !matches!(self, BackendDescriptor::RemoteApi { .. })
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            BackendDescriptor::Filesystem { storage_directory } => {
                if storage_directory.as_os_str().is_empty() {
                    return Err("storage_directory must not be empty".to_string());
                }
            }
            BackendDescriptor::Webdav { endpoint, token } => {
                if !matches!(endpoint.scheme(), "http" | "https") {
                    return Err(format!("webdav endpoint '{}' must be http(s)", endpoint));
                }
                if token.is_empty() {
                    return Err("webdav token must not be empty".to_string());
                }
            }
            BackendDescriptor::RemoteApi { url_template, .. } => {
                for placeholder in ["{z}", "{x}", "{y}"] {
                    if !url_template.contains(placeholder) {
                        return Err(format!("url_template is missing {}", placeholder));
                    }
                }
            }
            BackendDescriptor::S3 { bucket, .. } => {
                if bucket.is_empty() {
                    return Err("s3 bucket must not be empty".to_string());
                }
            }
            BackendDescriptor::Memory { capacity_bytes } => {
                if *capacity_bytes == 0 {
                    return Err("memory capacity_bytes must be greater than 0".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Processing engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessorKind {
    /// Pure-Rust raster engine (`image` crate)
    #[default]
    Raster,
}

impl SourceDescriptor {
    /// Validate a single descriptor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSource {
            name: self.name.clone(),
            reason,
        };

        if !is_valid_directory_name(&self.name) {
            return Err(invalid(
                "name must be non-empty and contain only letters, digits and '_'".to_string(),
            ));
        }
        self.source
            .validate()
            .map_err(|e| invalid(format!("source: {}", e)))?;
        self.cache
            .validate()
            .map_err(|e| invalid(format!("cache: {}", e)))?;

        if !self.cache.is_writable() {
            return Err(invalid(format!(
                "cache backend '{}' is read-only",
                self.cache.kind()
            )));
        }
        Ok(())
    }

    /// Effective `cache_originals` setting.
    pub fn caches_originals(&self) -> bool {
        self.cache_originals.unwrap_or(true)
    }
}

/// Validate every descriptor and check names are unique.
pub fn validate_sources(descriptors: &[SourceDescriptor]) -> Result<(), ConfigError> {
    if descriptors.is_empty() {
        return Err(ConfigError::InvalidSource {
            name: String::new(),
            reason: "at least one source is required".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for descriptor in descriptors {
        descriptor.validate()?;
        if !seen.insert(descriptor.name.as_str()) {
            return Err(ConfigError::InvalidSource {
                name: descriptor.name.clone(),
                reason: "duplicate source name".to_string(),
            });
        }
    }
    Ok(())
}

/// Parse source descriptors from JSON text.
pub fn parse_descriptors(json: &str) -> Result<Vec<SourceDescriptor>, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

fn read_descriptor_file(path: &Path) -> Result<Vec<SourceDescriptor>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_descriptors(&text)
}

// =============================================================================
// Tests
// =============================================================================
