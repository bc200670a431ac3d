//! Once-per-image bookkeeping for the segmentation embedding.
//!
//! Computing an image embedding is the expensive half of segmentation;
//! every point-query afterwards reuses it inside the execution unit.
//! The cache remembers which `(image, model, revision)` the unit holds
//! an embedding for, so that exactly one embedding job is outstanding
//! or satisfied per loaded image.

/// Identifies one embedding.
///
/// The revision distinguishes two loads of the same locator: reloading
/// an image must re-embed even if the URL is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingKey {
    /// Locator of the loaded image.
    pub image: String,
    /// Registry id of the segmentation model.
    pub model_id: String,
    /// Monotonic image load counter.
    pub revision: u64,
}

/// Whether the execution unit holds the embedding yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingState {
    /// An embedding job has been issued and has not finished.
    Pending,
    /// The unit reported `completeEmbedding`.
    Ready,
}

/// Tracks the single embedding the execution unit can hold.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entry: Option<(EmbeddingKey, EmbeddingState)>,
}

impl EmbeddingCache {
    /// An empty cache.
    #[must_use]
    pub const fn new() -> Self {
        Self { entry: None }
    }

    /// Record that an embedding job for `key` is about to be issued.
    ///
    /// Returns `false` if the job is already pending or satisfied for
    /// this key, in which case nothing should be sent. Any other key is
    /// evicted.
    pub fn begin(&mut self, key: EmbeddingKey) -> bool {
        if self.entry.as_ref().is_some_and(|(k, _)| *k == key) {
            return false;
        }
        tracing::debug!(image = %key.image, model = %key.model_id, revision = key.revision, "embedding requested");
        self.entry = Some((key, EmbeddingState::Pending));
        true
    }

    /// Mark `key` as embedded.
    ///
    /// Returns `false` (and changes nothing) if `key` is not the
    /// pending entry, e.g. because the image changed meanwhile.
    pub fn complete(&mut self, key: &EmbeddingKey) -> bool {
        match &mut self.entry {
            Some((k, state)) if k == key => {
                *state = EmbeddingState::Ready;
                true
            }
            _ => false,
        }
    }

    /// Forget `key` if it is the current entry, e.g. after the
    /// embedding job failed. Returns whether anything was dropped.
    pub fn fail(&mut self, key: &EmbeddingKey) -> bool {
        if self.entry.as_ref().is_some_and(|(k, _)| k == key) {
            self.entry = None;
            return true;
        }
        false
    }

    /// State of `key`, or `None` if it is not cached.
    #[must_use]
    pub fn state(&self, key: &EmbeddingKey) -> Option<EmbeddingState> {
        self.entry
            .as_ref()
            .filter(|(k, _)| k == key)
            .map(|(_, state)| *state)
    }

    /// `true` once the embedding for `key` is ready.
    #[must_use]
    pub fn is_ready(&self, key: &EmbeddingKey) -> bool {
        self.state(key) == Some(EmbeddingState::Ready)
    }

    /// The key currently held, pending or ready.
    #[must_use]
    pub fn current(&self) -> Option<&EmbeddingKey> {
        self.entry.as_ref().map(|(k, _)| k)
    }

    /// Drop whatever is cached.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}
