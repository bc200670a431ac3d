//! Interactive point-prompted segmentation, without I/O.
//!
//! [`Segmenter`] owns the state of one segmentation canvas: the loaded
//! image, its embedding state, the prompt points, and the last mask.
//! Every input returns the [`JobRequest`] to send (if any); job
//! results are fed back in. Nothing here talks to an execution unit.
//!
//! ```text
//! NoImage --load_image--> Loaded(Pending) --embedding_ready--> Loaded(Ready)
//!                                                 |
//!                         click --> Query --mask_ready--> Mask / cleared
//! ```
//!
//! Clicks before the embedding is ready are blocked. A mask result is
//! only accepted for the point set that requested it: each change to
//! the points bumps a revision, and results carrying an older revision
//! are dropped.

use crate::config::SegmenterConfig;
use crate::embedding::{EmbeddingCache, EmbeddingKey, EmbeddingState};
use crate::points::{ClickEvent, PointChange, PointMode, PointSet};
use crate::protocol::{JobKind, JobRequest};
use crate::registry::{ModelEntry, default_model};
use crate::types::MaskRef;

/// An embedding job to run, and the key to report its completion with.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingJob {
    /// The embedding-only request.
    pub request: JobRequest,
    /// Key for [`Segmenter::embedding_ready`] / [`Segmenter::embedding_failed`].
    pub key: EmbeddingKey,
}

/// A point-query to run for one revision of the point set.
#[derive(Debug, Clone, PartialEq)]
pub struct PointQuery {
    /// The request carrying the full point set.
    pub request: JobRequest,
    /// Point-set revision to hand back to [`Segmenter::mask_ready`].
    pub revision: u64,
}

/// What a click requires of the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickEffect {
    /// No image, its embedding is not ready, or the position is not a
    /// number. Nothing changed.
    Blocked,
    /// The point set changed and is non-empty; run this query.
    Query {
        /// How the point set changed.
        change: PointChange,
        /// The query to send.
        query: PointQuery,
    },
    /// The last point was removed; the mask is gone and no job is
    /// needed.
    MaskCleared,
}

#[derive(Debug, Clone)]
struct LoadedImage {
    locator: String,
    revision: u64,
}

/// State machine for one segmentation canvas.
#[derive(Debug)]
pub struct Segmenter {
    config: SegmenterConfig,
    model: &'static ModelEntry,
    image: Option<LoadedImage>,
    image_revision: u64,
    cache: EmbeddingCache,
    points: PointSet,
    points_revision: u64,
    mask: Option<MaskRef>,
    mode: PointMode,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}

impl Segmenter {
    /// A segmenter with no image, using the default segmentation model.
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            model: default_model(JobKind::Segmentation),
            image: None,
            image_revision: 0,
            cache: EmbeddingCache::new(),
            points: PointSet::new(),
            points_revision: 0,
            mask: None,
            mode: PointMode::default(),
        }
    }

    /// Load a new image.
    ///
    /// Points and mask are cleared, the point mode goes back to
    /// foreground, and the returned embedding job must run before any
    /// click is accepted.
    pub fn load_image(&mut self, locator: impl Into<String>) -> EmbeddingJob {
        let locator = locator.into();
        self.image_revision += 1;
        self.image = Some(LoadedImage {
            locator: locator.clone(),
            revision: self.image_revision,
        });
        self.points = PointSet::new();
        self.mask = None;
        self.mode = PointMode::default();
        self.bump_points_revision();
        self.cache.invalidate();
        tracing::debug!(revision = self.image_revision, "image loaded");

        let key = EmbeddingKey {
            image: locator,
            model_id: self.model.id.to_owned(),
            revision: self.image_revision,
        };
        self.cache.begin(key.clone());
        EmbeddingJob {
            request: JobRequest::embedding(self.model, &key.image),
            key,
        }
    }

    /// Switch the segmentation model.
    ///
    /// With an image loaded, the cached embedding is invalidated and a
    /// fresh embedding job is returned. Points are kept; they are
    /// re-queried once the new embedding is ready.
    pub fn set_model(&mut self, model: &'static ModelEntry) -> Option<EmbeddingJob> {
        if model.id == self.model.id {
            return None;
        }
        tracing::debug!(from = self.model.id, to = model.id, "segmentation model changed");
        self.model = model;
        self.cache.invalidate();
        self.bump_points_revision();
        self.begin_embedding()
    }

    /// Re-issue the embedding for the current image if none is pending
    /// or ready, e.g. after a failed or aborted embedding job.
    pub fn retry_embedding(&mut self) -> Option<EmbeddingJob> {
        self.begin_embedding()
    }

    /// The embedding for `key` finished.
    ///
    /// Returns the point-query to run if points survived a model
    /// switch. A stale key changes nothing.
    pub fn embedding_ready(&mut self, key: &EmbeddingKey) -> Option<PointQuery> {
        if !self.cache.complete(key) {
            tracing::debug!(?key, "ignoring stale embedding");
            return None;
        }
        self.query()
    }

    /// The embedding job for `key` failed or was aborted.
    pub fn embedding_failed(&mut self, key: &EmbeddingKey) {
        if self.cache.fail(key) {
            tracing::debug!(?key, "embedding dropped");
        }
    }

    /// Handle a click at normalized `(x, y)` on a canvas displayed
    /// `canvas_width_px` pixels wide.
    pub fn click(&mut self, x: f64, y: f64, canvas_width_px: f64) -> ClickEffect {
        if !self.is_ready() {
            return ClickEffect::Blocked;
        }
        // Every distance comparison with NaN fails, which removes all points.
        if !x.is_finite() || !y.is_finite() {
            tracing::debug!(x, y, "ignoring click at non-finite position");
            return ClickEffect::Blocked;
        }
        let click = ClickEvent::new(
            x.clamp(0.0, 1.0),
            y.clamp(0.0, 1.0),
            self.mode,
            self.config.removal_radius_px,
            canvas_width_px,
        );
        let (points, change) = self.points.apply(&click);
        self.points = points;
        self.bump_points_revision();

        match self.query() {
            Some(query) => ClickEffect::Query { change, query },
            None => {
                self.mask = None;
                ClickEffect::MaskCleared
            }
        }
    }

    /// A point-query finished with `mask`.
    ///
    /// Returns `false` and discards the mask if the point set changed
    /// after the query was issued.
    pub fn mask_ready(&mut self, revision: u64, mask: MaskRef) -> bool {
        if revision != self.points_revision || self.points.is_empty() {
            tracing::debug!(
                revision,
                current = self.points_revision,
                "discarding stale mask"
            );
            return false;
        }
        self.mask = Some(mask);
        true
    }

    /// Forget the image, points and mask.
    pub fn clear(&mut self) {
        self.image = None;
        self.points = PointSet::new();
        self.mask = None;
        self.mode = PointMode::default();
        self.cache.invalidate();
        self.bump_points_revision();
    }

    /// Flip between foreground and background placement.
    pub const fn toggle_point_mode(&mut self) -> PointMode {
        self.mode = self.mode.toggled();
        self.mode
    }

    /// Current placement mode.
    #[must_use]
    pub const fn point_mode(&self) -> PointMode {
        self.mode
    }

    /// Current prompt points.
    #[must_use]
    pub const fn points(&self) -> &PointSet {
        &self.points
    }

    /// The mask for the current points, if computed.
    #[must_use]
    pub const fn mask(&self) -> Option<&MaskRef> {
        self.mask.as_ref()
    }

    /// Locator of the loaded image.
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.image.as_ref().map(|i| i.locator.as_str())
    }

    /// The selected segmentation model.
    #[must_use]
    pub const fn model(&self) -> &'static ModelEntry {
        self.model
    }

    /// Overlay and hit-test settings.
    #[must_use]
    pub const fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Embedding state of the loaded image, `None` without an image.
    #[must_use]
    pub fn embedding_state(&self) -> Option<EmbeddingState> {
        self.embedding_key().and_then(|key| self.cache.state(&key))
    }

    /// `true` when clicks are accepted.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.embedding_state() == Some(EmbeddingState::Ready)
    }

    /// Revision of the current point set.
    #[must_use]
    pub const fn points_revision(&self) -> u64 {
        self.points_revision
    }

    fn embedding_key(&self) -> Option<EmbeddingKey> {
        self.image.as_ref().map(|image| EmbeddingKey {
            image: image.locator.clone(),
            model_id: self.model.id.to_owned(),
            revision: image.revision,
        })
    }

    fn begin_embedding(&mut self) -> Option<EmbeddingJob> {
        let key = self.embedding_key()?;
        if !self.cache.begin(key.clone()) {
            return None;
        }
        Some(EmbeddingJob {
            request: JobRequest::embedding(self.model, &key.image),
            key,
        })
    }

    fn query(&self) -> Option<PointQuery> {
        let image = self.image.as_ref()?;
        JobRequest::point_query(self.model, &image.locator, &self.points).map(|request| {
            PointQuery {
                request,
                revision: self.points_revision,
            }
        })
    }

    const fn bump_points_revision(&mut self) {
        self.points_revision += 1;
    }
}
