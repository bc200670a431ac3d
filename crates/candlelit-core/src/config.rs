//! Tunable parameters for jobs and the segmentation overlay.

use serde::{Deserialize, Serialize};

use crate::types::Color;

/// Sampling parameters for a text generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Softmax temperature. `0.0` means greedy decoding.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    /// Penalty applied to recently generated tokens.
    pub repeat_penalty: f64,
    /// Maximum number of tokens to generate.
    pub max_seq_len: u32,
}

impl GenerationParams {
    /// Default temperature (greedy).
    pub const DEFAULT_TEMPERATURE: f64 = 0.0;
    /// Default nucleus cutoff (disabled).
    pub const DEFAULT_TOP_P: f64 = 1.0;
    /// Default repeat penalty.
    pub const DEFAULT_REPEAT_PENALTY: f64 = 1.1;
    /// Default generation length.
    pub const DEFAULT_MAX_SEQ_LEN: u32 = 200;
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: Self::DEFAULT_TEMPERATURE,
            top_p: Self::DEFAULT_TOP_P,
            repeat_penalty: Self::DEFAULT_REPEAT_PENALTY,
            max_seq_len: Self::DEFAULT_MAX_SEQ_LEN,
        }
    }
}

/// Hit-testing and overlay styling for the segmentation canvas.
///
/// Radii are in displayed canvas pixels and independent of the image
/// size: the removal radius is normalized by the canvas width at click
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// A click closer than this to an existing point removes it.
    pub removal_radius_px: f64,
    /// Radius of the point markers drawn on the overlay.
    pub marker_radius_px: u32,
    /// Translucent fill drawn over the masked region.
    pub mask_fill: Color,
    /// Marker color for foreground points.
    pub foreground_marker: Color,
    /// Marker color for background points.
    pub background_marker: Color,
}

impl SegmenterConfig {
    /// Default removal radius.
    pub const DEFAULT_REMOVAL_RADIUS_PX: f64 = 6.0;
    /// Default marker radius.
    pub const DEFAULT_MARKER_RADIUS_PX: u32 = 3;
    /// Red at 60% opacity.
    pub const DEFAULT_MASK_FILL: Color = [255, 0, 0, 153];
    /// Opaque cyan.
    pub const DEFAULT_FOREGROUND_MARKER: Color = [0, 255, 255, 255];
    /// Opaque yellow.
    pub const DEFAULT_BACKGROUND_MARKER: Color = [255, 255, 0, 255];

    /// Marker color for a point.
    #[must_use]
    pub const fn marker_color(&self, is_foreground: bool) -> Color {
        if is_foreground {
            self.foreground_marker
        } else {
            self.background_marker
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            removal_radius_px: Self::DEFAULT_REMOVAL_RADIUS_PX,
            marker_radius_px: Self::DEFAULT_MARKER_RADIUS_PX,
            mask_fill: Self::DEFAULT_MASK_FILL,
            foreground_marker: Self::DEFAULT_FOREGROUND_MARKER,
            background_marker: Self::DEFAULT_BACKGROUND_MARKER,
        }
    }
}
