//! Applies a [`ProcessingConfiguration`] to source bytes.

use bytes::Bytes;
use tracing::debug;

use crate::error::ProcessingError;

use super::engine::ProcessingEngine;
use super::geometry::compute_geometry;
use super::options::ProcessingConfiguration;
use super::token::TransformationSpec;

/// Largest pixel count any resize step may allocate, including the
/// pre-crop size of a stretch.
pub const MAX_PIXELS: u64 = 8192 * 8192;

/// Encoded output of a transformation chain.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub data: Bytes,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Run every transformation in order and encode the result.
///
/// Each resize step derives its geometry from the image's current size, so
/// `200x100f_50s` resizes the already fitted image. A `Quality` step only
/// changes the running encode quality, which starts at
/// `save_options.quality`.
///
/// This is CPU-bound; async callers should run it on a blocking thread.
pub fn apply(
    engine: &dyn ProcessingEngine,
    source: &[u8],
    config: &ProcessingConfiguration,
) -> Result<ProcessedImage, ProcessingError> {
    let mut image = engine.open(source)?;
    let mut quality = config.save_options.quality;

    for spec in &config.transformations {
        match *spec {
            TransformationSpec::Resize {
                width,
                height,
                mode,
            } => {
                let (current_width, current_height) = image.size();
                let geometry =
                    compute_geometry(current_width, current_height, width, height, mode);
                debug!(
                    from_width = current_width,
                    from_height = current_height,
                    to_width = geometry.width,
                    to_height = geometry.height,
                    mode = %mode,
                    "Resizing"
                );
                check_pixel_limit(geometry.width, geometry.height)?;
                image.resize(geometry.width, geometry.height)?;
                if let Some(rect) = geometry.crop {
                    image.crop(rect)?;
                }
            }
            TransformationSpec::Quality { value } => quality = value,
        }
    }

    let (width, height) = image.size();
    let data = image.encode(quality)?;

    Ok(ProcessedImage {
        data,
        content_type: image.content_type(),
        width,
        height,
    })
}

fn check_pixel_limit(width: u32, height: u32) -> Result<(), ProcessingError> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > MAX_PIXELS {
        return Err(ProcessingError::LimitExceeded(format!(
            "resize to {}x{} exceeds {} pixels",
            width, height, MAX_PIXELS
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
