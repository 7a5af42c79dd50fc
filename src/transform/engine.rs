//! Processing engine capability.
//!
//! The service never touches pixels itself. It drives a [`ProcessingEngine`]
//! through a narrow interface: open, query size, crop, resize, encode.
//! [`RasterEngine`] implements it on top of the `image` crate.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::error::ProcessingError;

use super::geometry::CropRect;

/// Factory for decoded, mutable images.
pub trait ProcessingEngine: Send + Sync {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Decode `data` into an image ready for processing.
    fn open(&self, data: &[u8]) -> Result<Box<dyn ProcessingImage>, ProcessingError>;
}

/// A decoded image being transformed.
pub trait ProcessingImage: Send {
    /// Current `(width, height)` in pixels.
    fn size(&self) -> (u32, u32);

    /// Crop to `rect`, which must lie inside the current image.
    fn crop(&mut self, rect: CropRect) -> Result<(), ProcessingError>;

    /// Resize to exactly `width x height`.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), ProcessingError>;

    /// Encode using the format the image was decoded from.
    fn encode(&self, quality: u8) -> Result<Bytes, ProcessingError>;

    /// MIME type of the encoded output.
    fn content_type(&self) -> &'static str;
}

// =============================================================================
// Raster Engine
// =============================================================================

/// [`ProcessingEngine`] backed by the `image` crate.
///
/// Supports JPEG and PNG. Resizing uses Lanczos3; PNG output ignores the
/// quality setting.
#[derive(Debug, Clone, Default)]
pub struct RasterEngine;

impl RasterEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessingEngine for RasterEngine {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn open(&self, data: &[u8]) -> Result<Box<dyn ProcessingImage>, ProcessingError> {
        let format = detect_image_format(data)
            .ok_or_else(|| ProcessingError::Decode("unsupported image format".to_string()))?;

        let image = image::load_from_memory_with_format(data, format)
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(ProcessingError::Decode("image has no pixels".to_string()));
        }

        Ok(Box::new(RasterImage { image, format }))
    }
}

/// Detect JPEG or PNG from magic bytes. Other formats yield `None`.
pub fn detect_image_format(data: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(data) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => Some(format),
        _ => None,
    }
}

/// MIME type for a supported image format.
pub fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        _ => "image/jpeg",
    }
}

struct RasterImage {
    image: DynamicImage,
    format: ImageFormat,
}

impl ProcessingImage for RasterImage {
    fn size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    fn crop(&mut self, rect: CropRect) -> Result<(), ProcessingError> {
        let (width, height) = self.size();
        let fits = rect.width > 0
            && rect.height > 0
            && rect.left.checked_add(rect.width).is_some_and(|r| r <= width)
            && rect.top.checked_add(rect.height).is_some_and(|b| b <= height);
        if !fits {
            return Err(ProcessingError::InvalidGeometry(format!(
                "crop {:?} outside {}x{} image",
                rect, width, height
            )));
        }
        self.image = self
            .image
            .crop_imm(rect.left, rect.top, rect.width, rect.height);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), ProcessingError> {
        if width == 0 || height == 0 {
            return Err(ProcessingError::InvalidGeometry(format!(
                "cannot resize to {}x{}",
                width, height
            )));
        }
        if (width, height) != self.size() {
            self.image = self.image.resize_exact(width, height, FilterType::Lanczos3);
        }
        Ok(())
    }

    fn encode(&self, quality: u8) -> Result<Bytes, ProcessingError> {
        let mut output = Vec::new();
        match self.format {
            ImageFormat::Png => {
                self.image
                    .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
                    .map_err(|e| ProcessingError::Encode(e.to_string()))?;
            }
            _ => {
                // JPEG has no alpha channel
                let rgb = self.image.to_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
                encoder
                    .encode_image(&rgb)
                    .map_err(|e| ProcessingError::Encode(e.to_string()))?;
            }
        }
        Ok(Bytes::from(output))
    }

    fn content_type(&self) -> &'static str {
        mime_for_format(self.format)
    }
}

// =============================================================================
// Tests
// =============================================================================
