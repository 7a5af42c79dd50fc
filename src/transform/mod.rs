//! Image transformation.
//!
//! Turns the configuration part of a request key into an ordered chain of
//! transformations and applies it through a [`ProcessingEngine`].
//!
//! # Architecture
//!
//! ```text
//!   "s150x150_q60"
//!         │
//!         ▼
//! ┌──────────────────────────┐     ┌───────────────────────────┐
//! │ ProcessingConfiguration  │────▶│ TokenRegistry             │
//! │ ::parse()                │     │  ResizeTokenBuilder       │
//! │  split on '_'            │     │  QualityTokenBuilder      │
//! │  fallback: SaveOptions   │     │  (custom builders...)     │
//! └────────────┬─────────────┘     └───────────────────────────┘
//!              │ Vec<TransformationSpec> + SaveOptions
//!              ▼
//! ┌──────────────────────────┐     ┌───────────────────────────┐
//! │ pipeline::apply()        │────▶│ compute_geometry()        │
//! │  per Resize: geometry    │     │  FitIn / Stretch /        │
//! │  per Quality: encode q   │     │  PreserveWidth / Height   │
//! └────────────┬─────────────┘     └───────────────────────────┘
//!              ▼
//! ┌──────────────────────────┐
//! │ ProcessingEngine         │
//! │  (RasterEngine: image)   │
//! └──────────────────────────┘
//! ```

pub mod engine;
pub mod geometry;
pub mod options;
pub mod pipeline;
pub mod token;

pub use engine::{detect_image_format, mime_for_format, ProcessingEngine, ProcessingImage, RasterEngine};
pub use geometry::{compute_geometry, CropRect, Geometry, ResizeMode};
pub use options::{ProcessingConfiguration, SaveOptions, DEFAULT_QUALITY};
pub use pipeline::{apply, ProcessedImage, MAX_PIXELS};
pub use token::{
    parse_quality_token, QualityTokenBuilder, ResizeTokenBuilder, TokenBuilder, TokenRegistry,
    TransformationSpec, MAX_DIMENSION, MAX_QUALITY, MIN_QUALITY,
};
