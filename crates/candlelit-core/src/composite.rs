//! Mask compositing: the segmentation overlay and the cut-out export.
//!
//! Both operations are pure functions of decoded pixels. Fetching the
//! mask behind a [`MaskRef`](crate::MaskRef) and putting the result on
//! screen are left to the I/O layer.
//!
//! A mask is a single coverage channel. Masks whose size differs from
//! the image are stretched to fit, the way a canvas `drawImage` would.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_circle_mut;

use crate::config::SegmenterConfig;
use crate::points::PointSet;
use crate::types::Dimensions;

/// Errors from decoding or applying a mask.
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    /// The mask bytes were empty.
    #[error("mask data is empty")]
    EmptyInput,

    /// The mask has no pixels.
    #[error("mask has zero size ({width}x{height})")]
    EmptyMask {
        /// Mask width.
        width: u32,
        /// Mask height.
        height: u32,
    },

    /// The bytes are not a readable image.
    #[error("failed to decode mask: {0}")]
    Decode(#[from] image::ImageError),
}

/// Per-pixel coverage in `0..=255`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    coverage: GrayImage,
}

impl Mask {
    /// Wrap a coverage channel.
    ///
    /// # Errors
    ///
    /// Returns [`CompositeError::EmptyMask`] for a zero-sized image.
    pub fn new(coverage: GrayImage) -> Result<Self, CompositeError> {
        if coverage.width() == 0 || coverage.height() == 0 {
            return Err(CompositeError::EmptyMask {
                width: coverage.width(),
                height: coverage.height(),
            });
        }
        Ok(Self { coverage })
    }

    /// Decode a mask from encoded image bytes (PNG, JPEG, BMP, WebP).
    ///
    /// Images with an alpha channel use it as coverage, like a canvas
    /// `destination-in` composite. Opaque images use their luminance,
    /// so black-and-white masks work too.
    ///
    /// # Errors
    ///
    /// Returns [`CompositeError::EmptyInput`] for empty `bytes`,
    /// [`CompositeError::Decode`] for unreadable data, and
    /// [`CompositeError::EmptyMask`] for a zero-sized image.
    pub fn decode(bytes: &[u8]) -> Result<Self, CompositeError> {
        if bytes.is_empty() {
            return Err(CompositeError::EmptyInput);
        }
        let decoded = image::load_from_memory(bytes)?;
        if decoded.color().has_alpha() {
            Self::from_alpha(&decoded.to_rgba8())
        } else {
            Self::new(decoded.to_luma8())
        }
    }

    /// Coverage from the alpha channel of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`CompositeError::EmptyMask`] for a zero-sized image.
    pub fn from_alpha(image: &RgbaImage) -> Result<Self, CompositeError> {
        Self::new(GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([image.get_pixel(x, y).0[3]])
        }))
    }

    /// Mask size.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.coverage.width(), self.coverage.height())
    }

    /// The coverage channel.
    #[must_use]
    pub const fn coverage(&self) -> &GrayImage {
        &self.coverage
    }

    /// Coverage at `dimensions`, stretched if needed.
    fn fitted(&self, dimensions: Dimensions) -> GrayImage {
        if self.dimensions() == dimensions {
            return self.coverage.clone();
        }
        imageops::resize(
            &self.coverage,
            dimensions.width,
            dimensions.height,
            FilterType::Triangle,
        )
    }
}

/// Source-over blend of `src` with an extra `weight` in `0..=255`.
#[allow(clippy::cast_possible_truncation)] // each channel stays within 0..=255
fn blend(dst: Rgba<u8>, src: Rgba<u8>, weight: u8) -> Rgba<u8> {
    let a = u32::from(src.0[3]) * u32::from(weight) / 255;
    let inv = 255 - a;
    let mut out = dst.0;
    for (channel, source) in out.iter_mut().zip(src.0).take(3) {
        *channel = ((u32::from(source) * a + u32::from(*channel) * inv) / 255) as u8;
    }
    out[3] = (a + u32::from(dst.0[3]) * inv / 255).min(255) as u8;
    Rgba(out)
}

/// Render the segmentation overlay.
///
/// The translucent `config.mask_fill` is drawn over `image` wherever
/// the mask covers it, then one filled marker per point, cyan for
/// foreground and yellow for background by default. Without a mask,
/// only the markers are drawn.
#[must_use = "returns the composited image"]
pub fn overlay(
    image: &RgbaImage,
    mask: Option<&Mask>,
    points: &PointSet,
    config: &SegmenterConfig,
) -> RgbaImage {
    let dimensions = Dimensions::of(image);
    let mut out = image.clone();

    if let Some(mask) = mask {
        let coverage = mask.fitted(dimensions);
        let fill = Rgba(config.mask_fill);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let weight = coverage.get_pixel(x, y).0[0];
            if weight > 0 {
                *pixel = blend(*pixel, fill, weight);
            }
        }
    }

    let radius = i32::try_from(config.marker_radius_px).unwrap_or(i32::MAX);
    for point in points {
        let (cx, cy) = point.to_canvas(dimensions);
        #[allow(clippy::cast_possible_truncation)] // canvas coordinates fit in i32
        let center = (cx.round() as i32, cy.round() as i32);
        draw_filled_circle_mut(
            &mut out,
            center,
            radius,
            Rgba(config.marker_color(point.is_foreground)),
        );
    }
    out
}

/// Cut the masked region out of `image`.
///
/// Every pixel keeps its color; its alpha is scaled by the mask
/// coverage, so pixels outside the mask become fully transparent.
#[must_use = "returns the cut-out image"]
#[allow(clippy::cast_possible_truncation)] // product / 255 fits in u8
pub fn cutout(image: &RgbaImage, mask: &Mask) -> RgbaImage {
    let coverage = mask.fitted(Dimensions::of(image));
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let weight = u32::from(coverage.get_pixel(x, y).0[0]);
        pixel.0[3] = (u32::from(pixel.0[3]) * weight / 255) as u8;
    }
    out
}
