//! Request key parser.
//!
//! Splits a request path into the canonical source key, the thumbnail mask
//! used for cascading invalidation, and the raw processing configuration.

use std::fmt;

use glob::MatchOptions;

use crate::error::ParseError;

use super::validator::validate_source_key;

/// Image extensions accepted for source keys.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Glob options for thumbnail masks.
pub const MASK_MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

// =============================================================================
// Key Types
// =============================================================================

/// Canonical key of an original image, always `/`-prefixed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase extension without the dot.
    pub fn extension(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wildcard pattern matching every derived artifact of a source key.
///
/// `/a/b/img.jpg` becomes `/a/b/img*.jpg`. Only used for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailMask(String);

impl ThumbnailMask {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory part of the mask, including the trailing `/`.
    pub fn directory(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..=idx],
            None => "/",
        }
    }

    /// Filename pattern, e.g. `img*.jpg`.
    pub fn file_pattern(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Everything before the wildcard. Useful for prefix listings.
    pub fn literal_prefix(&self) -> &str {
        self.0.split('*').next().unwrap_or("")
    }

    /// Whether `key` is matched by this mask. The wildcard never crosses a `/`.
    pub fn matches(&self, key: &str) -> bool {
        glob::Pattern::new(&self.0)
            .map(|pattern| pattern.matches_with(key, MASK_MATCH_OPTIONS))
            .unwrap_or(false)
    }
}

impl fmt::Display for ThumbnailMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of parsing a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    /// Full request key, normalized to a leading `/`. Derived artifacts are
    /// cached under this key.
    pub request_key: String,

    /// Canonical key of the source image
    pub source_key: SourceKey,

    /// Mask matching all derived artifacts of the source
    pub thumbnail_mask: ThumbnailMask,

    /// Underscore-delimited token string, empty for verbatim requests
    pub config: String,
}

impl ParsedKey {
    /// Whether the request names the source image itself.
    pub fn is_source_request(&self) -> bool {
        self.config.is_empty()
    }
}

// =============================================================================
// Parser
// =============================================================================

fn invalid(key: &str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidKey {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Parse a request path into its source key, thumbnail mask and
/// configuration string.
///
/// # Errors
///
/// Returns [`ParseError`] when the path is empty, has an unsupported
/// extension, an empty source name, or violates the key rules.
pub fn parse_request_key(path: &str) -> Result<ParsedKey, ParseError> {
    if path.is_empty() || path == "/" {
        return Err(ParseError::EmptyKey);
    }

    let request_key = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    if let Some(violation) = validate_source_key(&request_key).into_iter().next() {
        return Err(invalid(&request_key, violation.to_string()));
    }

    // validated non-empty with a leading '/', so rfind always succeeds
    let slash = request_key.rfind('/').unwrap_or(0);
    let (dir, filename) = request_key.split_at(slash + 1);

    let (base, ext) = filename
        .rsplit_once('.')
        .ok_or_else(|| ParseError::UnsupportedExtension(request_key.clone()))?;
    if !SUPPORTED_EXTENSIONS.contains(&ext) {
        return Err(ParseError::UnsupportedExtension(request_key.clone()));
    }

    if base.trim().is_empty() {
        return Err(invalid(&request_key, "empty file name"));
    }

    let (head, config) = base.split_once('_').unwrap_or((base, ""));
    if head.is_empty() {
        return Err(invalid(&request_key, "empty source name before '_'"));
    }
    if config.is_empty() && base.contains('_') {
        return Err(invalid(&request_key, "empty processing configuration after '_'"));
    }

    let source_key = format!("{}{}.{}", dir, head, ext);
    if let Some(violation) = validate_source_key(&source_key).into_iter().next() {
        return Err(invalid(&source_key, violation.to_string()));
    }

    let thumbnail_mask = format!("{}{}*.{}", dir, head, ext);

    Ok(ParsedKey {
        request_key: request_key.clone(),
        source_key: SourceKey(source_key),
        thumbnail_mask: ThumbnailMask(thumbnail_mask),
        config: config.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
