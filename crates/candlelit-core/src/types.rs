//! Shared types for the candlelit core.

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can pass decoded images
/// and masks around without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an existing image.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self::new(image.width(), image.height())
    }
}

/// An opaque reference to a mask image produced by a point-query.
///
/// The execution unit hands back a locator (in the browser, a Blob
/// URL); resolving it to pixels is the job of an I/O adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaskRef(String);

impl MaskRef {
    /// Wrap a mask locator.
    #[must_use]
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    /// The locator string, e.g. a `blob:` URL.
    #[must_use]
    pub fn locator(&self) -> &str {
        &self.0
    }
}

/// An 8-bit RGBA color.
///
/// Serialized as a four-element array so config files stay readable.
pub type Color = [u8; 4];
