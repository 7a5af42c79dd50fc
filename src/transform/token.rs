//! Transformation token registry.
//!
//! Each token of a processing configuration is offered to the registered
//! [`TokenBuilder`]s in order. A builder either declines the token
//! (`Ok(None)`), claims and builds it (`Ok(Some(spec))`), or claims it and
//! rejects it as malformed (`Err`). Builders claim tokens by their first
//! character, so a malformed token never silently falls through to another
//! builder.
//!
//! # Grammar
//!
//! ```text
//! resize  := [mode] width ["x" height] [mode]     e.g. 150, 150x100, s150x150, 100x50f
//! mode    := "f" | "s" | "w" | "h"                (case-insensitive, at most one)
//! quality := "q" digits                           e.g. q60  (15..=100)
//! ```

use crate::error::ParseError;

use super::geometry::ResizeMode;

/// Lowest accepted encode quality.
pub const MIN_QUALITY: u8 = 15;

/// Highest accepted encode quality.
pub const MAX_QUALITY: u8 = 100;

/// Largest width or height a resize token may ask for.
pub const MAX_DIMENSION: u32 = 8192;

/// One step of a processing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationSpec {
    /// Resize to a target box using the given mode
    Resize {
        width: u32,
        height: u32,
        mode: ResizeMode,
    },
    /// Set the encode quality used when the image is written out
    Quality { value: u8 },
}

/// Builds a [`TransformationSpec`] from a single configuration token.
pub trait TokenBuilder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Build a spec from `token`.
    ///
    /// Returns `Ok(None)` when the token is not meant for this builder.
    fn build(&self, token: &str) -> Result<Option<TransformationSpec>, ParseError>;
}

fn invalid_token(token: &str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidToken {
        token: token.to_string(),
        reason: reason.into(),
    }
}

// =============================================================================
// Resize
// =============================================================================

/// Builder for `[mode]<width>[x<height>][mode]` tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResizeTokenBuilder;

impl ResizeTokenBuilder {
    /// A token is a resize attempt when it starts with a digit, or with a
    /// mode letter directly followed by a digit.
    fn claims(token: &str) -> bool {
        let mut chars = token.chars();
        match chars.next() {
            Some(c) if c.is_ascii_digit() => true,
            Some(c) if ResizeMode::from_code(c).is_some() => {
                chars.next().is_some_and(|c| c.is_ascii_digit())
            }
            _ => false,
        }
    }

    fn parse(token: &str) -> Result<TransformationSpec, ParseError> {
        let mut rest = token;
        let mut mode = None;

        if let Some(c) = rest.chars().next().filter(|c| c.is_ascii_alphabetic()) {
            mode = ResizeMode::from_code(c);
            rest = &rest[1..];
        }

        let (width, after_width) = split_digits(rest);
        if width.is_empty() {
            return Err(invalid_token(token, "missing width"));
        }
        let width = parse_dimension(token, width)?;
        rest = after_width;

        let height = match rest.strip_prefix('x') {
            Some(after_x) => {
                let (height, after_height) = split_digits(after_x);
                if height.is_empty() {
                    return Err(invalid_token(token, "expected height after 'x'"));
                }
                rest = after_height;
                parse_dimension(token, height)?
            }
            None => width,
        };

        if let Some(c) = rest.chars().next() {
            if mode.is_some() {
                return Err(invalid_token(
                    token,
                    format!("unexpected trailing characters '{}'", rest),
                ));
            }
            mode = Some(ResizeMode::from_code(c).ok_or_else(|| {
                invalid_token(token, format!("unknown resize mode '{}'", c))
            })?);
            rest = &rest[c.len_utf8()..];
        }

        if !rest.is_empty() {
            return Err(invalid_token(
                token,
                format!("unexpected trailing characters '{}'", rest),
            ));
        }

        Ok(TransformationSpec::Resize {
            width,
            height,
            mode: mode.unwrap_or_default(),
        })
    }
}

impl TokenBuilder for ResizeTokenBuilder {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn build(&self, token: &str) -> Result<Option<TransformationSpec>, ParseError> {
        if !Self::claims(token) {
            return Ok(None);
        }
        Self::parse(token).map(Some)
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s.split_at(end)
}

fn parse_dimension(token: &str, digits: &str) -> Result<u32, ParseError> {
    let value: u32 = digits
        .parse()
        .map_err(|_| invalid_token(token, format!("dimension '{}' is too large", digits)))?;
    if value == 0 {
        return Err(invalid_token(token, "dimensions must be positive"));
    }
    if value > MAX_DIMENSION {
        return Err(invalid_token(
            token,
            format!("dimension {} exceeds the maximum of {}", value, MAX_DIMENSION),
        ));
    }
    Ok(value)
}

// =============================================================================
// Quality
// =============================================================================

/// Builder for `q<digits>` tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityTokenBuilder;

impl TokenBuilder for QualityTokenBuilder {
    fn name(&self) -> &'static str {
        "quality"
    }

    fn build(&self, token: &str) -> Result<Option<TransformationSpec>, ParseError> {
        Ok(parse_quality_token(token)?.map(|value| TransformationSpec::Quality { value }))
    }
}

/// Parse a `q<digits>` token.
///
/// Returns `Ok(None)` when the token does not start with `q`.
pub fn parse_quality_token(token: &str) -> Result<Option<u8>, ParseError> {
    let Some(digits) = token.strip_prefix('q') else {
        return Ok(None);
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid_token(token, "quality must be 'q' followed by digits"));
    }
    let value: u32 = digits
        .parse()
        .map_err(|_| invalid_token(token, "quality value is too large"))?;
    if !(MIN_QUALITY as u32..=MAX_QUALITY as u32).contains(&value) {
        return Err(invalid_token(
            token,
            format!("quality must be between {} and {}", MIN_QUALITY, MAX_QUALITY),
        ));
    }
    Ok(Some(value as u8))
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered list of token builders.
///
/// The default registry knows resize and quality tokens. Additional builders
/// can be registered without touching the configuration parser.
pub struct TokenRegistry {
    builders: Vec<Box<dyn TokenBuilder>>,
}

impl TokenRegistry {
    /// A registry with no builders.
    pub fn empty() -> Self {
        Self {
            builders: Vec::new(),
        }
    }

    /// Append a builder; it is tried after every builder registered before it.
    pub fn register(&mut self, builder: impl TokenBuilder + 'static) {
        self.builders.push(Box::new(builder));
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with_builder(mut self, builder: impl TokenBuilder + 'static) -> Self {
        self.register(builder);
        self
    }

    /// Names of registered builders, in order.
    pub fn builder_names(&self) -> Vec<&'static str> {
        self.builders.iter().map(|b| b.name()).collect()
    }

    /// Offer `token` to each builder in registration order; the first one
    /// that claims it wins.
    pub fn build(&self, token: &str) -> Result<Option<TransformationSpec>, ParseError> {
        for builder in &self.builders {
            if let Some(spec) = builder.build(token)? {
                return Ok(Some(spec));
            }
        }
        Ok(None)
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::empty()
            .with_builder(ResizeTokenBuilder)
            .with_builder(QualityTokenBuilder)
    }
}

impl std::fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("builders", &self.builder_names())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
