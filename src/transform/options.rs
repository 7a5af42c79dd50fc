//! Processing configuration parsing.

use crate::error::ParseError;

use super::token::{parse_quality_token, TokenRegistry, TransformationSpec};

/// Default encode quality.
pub const DEFAULT_QUALITY: u8 = 85;

/// Options applied when the processed image is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Encode quality (15-100)
    pub quality: u8,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
        }
    }
}

impl SaveOptions {
    /// Apply a save-option token.
    ///
    /// Returns `Ok(false)` when the token is not a save option.
    pub fn apply_token(&mut self, token: &str) -> Result<bool, ParseError> {
        match parse_quality_token(token)? {
            Some(quality) => {
                self.quality = quality;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Parsed processing configuration of a request key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingConfiguration {
    /// Transformations in request order
    pub transformations: Vec<TransformationSpec>,

    /// Encode options
    pub save_options: SaveOptions,

    /// True only when the configuration string was empty
    pub is_default: bool,
}

impl Default for ProcessingConfiguration {
    fn default() -> Self {
        Self {
            transformations: Vec::new(),
            save_options: SaveOptions::default(),
            is_default: true,
        }
    }
}

impl ProcessingConfiguration {
    /// Parse an underscore-delimited configuration string.
    ///
    /// An empty string yields the default configuration. Every other string
    /// produces `is_default == false`, even when its tokens only touch save
    /// options.
    ///
    /// # Errors
    ///
    /// Fails on the first token that is malformed or that neither a builder
    /// nor the save options accept.
    pub fn parse(config: &str, registry: &TokenRegistry) -> Result<Self, ParseError> {
        if config.is_empty() {
            return Ok(Self::default());
        }

        let mut parsed = Self {
            is_default: false,
            ..Self::default()
        };

        for token in config.split('_') {
            if token.is_empty() {
                return Err(ParseError::InvalidToken {
                    token: String::new(),
                    reason: format!("empty token in '{}'", config),
                });
            }

            match registry.build(token)? {
                Some(spec) => {
                    if let TransformationSpec::Quality { value } = spec {
                        parsed.save_options.quality = value;
                    }
                    parsed.transformations.push(spec);
                }
                None => {
                    if !parsed.save_options.apply_token(token)? {
                        return Err(ParseError::UnrecognizedToken(token.to_string()));
                    }
                }
            }
        }

        Ok(parsed)
    }

    /// Whether any step changes pixels (as opposed to only re-encoding).
    pub fn has_resize(&self) -> bool {
        self.transformations
            .iter()
            .any(|t| matches!(t, TransformationSpec::Resize { .. }))
    }
}
