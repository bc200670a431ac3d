//! Prompt points and the click reducer.
//!
//! Points live in normalized image space (`0.0..=1.0` on both axes) so
//! they survive canvas resizing. A click either removes every point
//! within the removal radius of the click, or appends a new point;
//! never both. The reducer [`PointSet::apply`] is pure.

use serde::{Deserialize, Serialize};

use crate::types::Dimensions;

/// A segmentation prompt point in normalized image coordinates.
///
/// On the wire a point is the 3-tuple `[x, y, is_foreground]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64, bool)", into = "(f64, f64, bool)")]
pub struct Point {
    /// Horizontal position as a fraction of image width.
    pub x: f64,
    /// Vertical position as a fraction of image height.
    pub y: f64,
    /// `true` for a foreground (include) point, `false` for background.
    pub is_foreground: bool,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64, is_foreground: bool) -> Self {
        Self { x, y, is_foreground }
    }

    /// Euclidean distance from this point to `(x, y)` in normalized space.
    #[must_use]
    pub fn distance_to(self, x: f64, y: f64) -> f64 {
        let dx = self.x - x;
        let dy = self.y - y;
        dx.mul_add(dx, dy * dy).sqrt()
    }

    /// Denormalize to pixel coordinates for a canvas of `dimensions`.
    #[must_use]
    pub fn to_canvas(self, dimensions: Dimensions) -> (f64, f64) {
        (
            self.x * f64::from(dimensions.width),
            self.y * f64::from(dimensions.height),
        )
    }
}

impl From<(f64, f64, bool)> for Point {
    fn from((x, y, is_foreground): (f64, f64, bool)) -> Self {
        Self::new(x, y, is_foreground)
    }
}

impl From<Point> for (f64, f64, bool) {
    fn from(p: Point) -> Self {
        (p.x, p.y, p.is_foreground)
    }
}

/// Whether new points are placed as foreground or background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointMode {
    /// Points mark the object to segment.
    #[default]
    Foreground,
    /// Points mark regions to exclude.
    Background,
}

impl PointMode {
    /// The other mode.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Foreground => Self::Background,
            Self::Background => Self::Foreground,
        }
    }

    /// `true` for [`PointMode::Foreground`].
    #[must_use]
    pub const fn is_foreground(self) -> bool {
        matches!(self, Self::Foreground)
    }

    /// Label shown on the mode toggle.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Foreground => "Mask Point",
            Self::Background => "Background Point",
        }
    }
}

/// A click on the canvas, already normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickEvent {
    /// Normalized horizontal click position.
    pub x: f64,
    /// Normalized vertical click position.
    pub y: f64,
    /// Mode for a point added by this click.
    pub mode: PointMode,
    /// Removal radius in normalized units.
    pub radius: f64,
}

impl ClickEvent {
    /// Build a click whose removal radius is `radius_px` canvas pixels,
    /// normalized by the displayed canvas width.
    ///
    /// A zero or negative width yields a zero radius, so the click can
    /// only add.
    #[must_use]
    pub fn new(x: f64, y: f64, mode: PointMode, radius_px: f64, canvas_width_px: f64) -> Self {
        let radius = if canvas_width_px > 0.0 {
            radius_px / canvas_width_px
        } else {
            0.0
        };
        Self { x, y, mode, radius }
    }
}

/// What a click did to the point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointChange {
    /// A new point was appended.
    Added(Point),
    /// This many existing points were within the radius and removed.
    Removed(usize),
}

/// An ordered set of prompt points for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointSet(Vec<Point>);

impl PointSet {
    /// An empty point set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns `true` if there are no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of points.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// All points in insertion order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Iterate points in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.0.iter()
    }

    /// Apply a click, returning the new set and what changed.
    ///
    /// Every point strictly closer than `click.radius` is removed. If no
    /// point is that close, `(click.x, click.y)` is appended with the
    /// click's mode.
    #[must_use = "returns the updated point set"]
    pub fn apply(&self, click: &ClickEvent) -> (Self, PointChange) {
        let kept: Vec<Point> = self
            .0
            .iter()
            .copied()
            .filter(|p| p.distance_to(click.x, click.y) >= click.radius)
            .collect();

        let removed = self.0.len() - kept.len();
        if removed > 0 {
            return (Self(kept), PointChange::Removed(removed));
        }

        let point = Point::new(click.x, click.y, click.mode.is_foreground());
        let mut points = kept;
        points.push(point);
        (Self(points), PointChange::Added(point))
    }
}

impl From<Vec<Point>> for PointSet {
    fn from(points: Vec<Point>) -> Self {
        Self(points)
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
