//! Resize geometry.
//!
//! Pure computation of output dimensions and an optional crop rectangle from
//! a source size, a target size and a [`ResizeMode`]. All rounding is
//! half-away-from-zero (`f64::round`).

use std::fmt;

/// How a resize target is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResizeMode {
    /// Scale to fit inside the target box, keeping aspect ratio (`f`)
    FitIn,
    /// Scale to cover the target box, then centre-crop to it (`s`)
    #[default]
    Stretch,
    /// Scale to the target width, height follows the aspect ratio (`w`)
    PreserveWidth,
    /// Scale to the target height, width follows the aspect ratio (`h`)
    PreserveHeight,
}

impl ResizeMode {
    /// Parse a one-character mode code, case-insensitively.
    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_lowercase() {
            'f' => Some(ResizeMode::FitIn),
            's' => Some(ResizeMode::Stretch),
            'w' => Some(ResizeMode::PreserveWidth),
            'h' => Some(ResizeMode::PreserveHeight),
            _ => None,
        }
    }

    /// The canonical lowercase code for this mode.
    pub fn code(self) -> char {
        match self {
            ResizeMode::FitIn => 'f',
            ResizeMode::Stretch => 's',
            ResizeMode::PreserveWidth => 'w',
            ResizeMode::PreserveHeight => 'h',
        }
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResizeMode::FitIn => "fit-in",
            ResizeMode::Stretch => "stretch",
            ResizeMode::PreserveWidth => "preserve-width",
            ResizeMode::PreserveHeight => "preserve-height",
        };
        f.write_str(name)
    }
}

/// Crop rectangle in the coordinates of the resized (intermediate) image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Output of [`compute_geometry`].
///
/// The image is first resized to `width x height`, then cropped to `crop`
/// when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub crop: Option<CropRect>,
}

impl Geometry {
    /// Dimensions of the final image after the optional crop.
    pub fn final_size(&self) -> (u32, u32) {
        match self.crop {
            Some(rect) => (rect.width, rect.height),
            None => (self.width, self.height),
        }
    }
}

#[inline]
fn scaled(value: u32, scale: f64) -> u32 {
    (value as f64 * scale).round().max(1.0) as u32
}

/// Compute resize dimensions and crop for one resize step.
///
/// All dimensions must be positive. Scales are derived from the given source
/// size, so callers resizing a chain must pass the current image size.
pub fn compute_geometry(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
    mode: ResizeMode,
) -> Geometry {
    let sw = source_width.max(1) as f64;
    let sh = source_height.max(1) as f64;
    let scale_x = target_width as f64 / sw;
    let scale_y = target_height as f64 / sh;

    match mode {
        ResizeMode::FitIn => {
            let scale = scale_x.min(scale_y);
            Geometry {
                width: scaled(source_width, scale),
                height: scaled(source_height, scale),
                crop: None,
            }
        }
        ResizeMode::Stretch => {
            let scale = scale_x.max(scale_y);
            // covering scale guarantees at least the target; clamp away float noise
            let width = scaled(source_width, scale).max(target_width);
            let height = scaled(source_height, scale).max(target_height);
            let left = ((width - target_width) as f64 / 2.0).round() as u32;
            let top = ((height - target_height) as f64 / 2.0).round() as u32;
            Geometry {
                width,
                height,
                crop: Some(CropRect {
                    left,
                    top,
                    width: target_width,
                    height: target_height,
                }),
            }
        }
        ResizeMode::PreserveWidth => Geometry {
            width: target_width,
            height: scaled(source_height, scale_x),
            crop: None,
        },
        ResizeMode::PreserveHeight => Geometry {
            width: scaled(source_width, scale_y),
            height: target_height,
            crop: None,
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
