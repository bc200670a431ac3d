//! Orchestrators that pair one execution unit with its job state.
//!
//! Each session owns a [`JobController`] (and through it, one
//! execution unit) for a single job kind. Methods change state and send
//! their request synchronously, then return a future for the result,
//! so the order of UI events is the order of requests even when the
//! futures are awaited later or not at all.

#![allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed

use std::cell::{Cell, Ref, RefCell};
use std::future::Future;
use std::rc::Rc;

use crate::channel::TaskChannel;
use crate::chat::Conversation;
use crate::composite::{self, Mask};
use crate::config::{GenerationParams, SegmenterConfig};
use crate::controller::{JobController, JobError, JobHandle, JobOutcome};
use crate::points::PointMode;
use crate::protocol::{JobKind, JobRequest};
use crate::registry::{ModelEntry, default_model};
use crate::segment::{ClickEffect, EmbeddingJob, Segmenter};
use crate::status::{JobOutput, MalformedOutput, Progress, TextOutput};
use crate::transcript::Transcript;
use crate::types::{MaskRef, RgbaImage};

/// Seeds are drawn from `0..SEED_RANGE`.
pub const SEED_RANGE: u64 = 1_000_000;

type SharedProgress = Rc<RefCell<dyn FnMut(&Progress)>>;

fn share<F: FnMut(&Progress) + 'static>(on_progress: F) -> SharedProgress {
    Rc::new(RefCell::new(on_progress))
}

fn forward(shared: &SharedProgress) -> impl FnMut(&Progress) + 'static {
    let shared = Rc::clone(shared);
    move |progress: &Progress| {
        if let Ok(mut on_progress) = shared.try_borrow_mut() {
            (*on_progress)(progress);
        }
    }
}

/// A random generation seed in `0..SEED_RANGE`.
///
/// Falls back to the clock if the platform has no entropy source.
#[must_use]
pub fn random_seed() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::fill(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) % SEED_RANGE,
        Err(error) => {
            tracing::warn!(%error, "no entropy source, seeding from the clock");
            web_time::SystemTime::now()
                .duration_since(web_time::UNIX_EPOCH)
                .map_or(0, |elapsed| u64::from(elapsed.subsec_nanos()))
                % SEED_RANGE
        }
    }
}

/// What a segmentation interaction produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentUpdate {
    /// The image embedding is ready; clicks are accepted.
    EmbeddingReady,
    /// A new mask for the current points.
    Mask(MaskRef),
    /// The point set became empty and the mask was removed.
    MaskCleared,
    /// The click arrived before the embedding was ready.
    Blocked,
    /// The job was aborted.
    Aborted,
    /// The result belonged to a superseded request and was dropped.
    Discarded,
    /// Nothing needed to run.
    Unchanged,
}

enum Started {
    Immediate(SegmentUpdate),
    Query { revision: u64, handle: JobHandle },
}

/// Interactive segmentation over one execution unit.
pub struct SegmentationSession<C: TaskChannel> {
    segmenter: RefCell<Segmenter>,
    controller: JobController<C>,
}

impl<C: TaskChannel> SegmentationSession<C> {
    /// A session on `channel`.
    #[must_use]
    pub fn new(channel: C, config: SegmenterConfig) -> Self {
        Self::with_controller(JobController::new(channel), config)
    }

    /// A session on an existing controller, e.g. a detached one.
    #[must_use]
    pub fn with_controller(controller: JobController<C>, config: SegmenterConfig) -> Self {
        Self {
            segmenter: RefCell::new(Segmenter::new(config)),
            controller,
        }
    }

    /// Current state. Do not hold the borrow across an await.
    #[must_use]
    pub fn segmenter(&self) -> Ref<'_, Segmenter> {
        self.segmenter.borrow()
    }

    /// The controller running this session's jobs.
    #[must_use]
    pub const fn controller(&self) -> &JobController<C> {
        &self.controller
    }

    /// Load an image and compute its embedding.
    ///
    /// Resolves with [`SegmentUpdate::EmbeddingReady`] once clicks are
    /// accepted.
    pub fn load_image<'a, F>(
        &'a self,
        locator: &str,
        on_progress: F,
    ) -> impl Future<Output = Result<SegmentUpdate, JobError>> + use<'a, C, F>
    where
        F: FnMut(&Progress) + 'static,
    {
        let job = self.segmenter.borrow_mut().load_image(locator);
        self.start_embedding(job, on_progress)
    }

    /// Switch models. With an image loaded this re-embeds it and then
    /// re-queries any existing points.
    pub fn set_model<F>(
        &self,
        model: &'static ModelEntry,
        on_progress: F,
    ) -> impl Future<Output = Result<SegmentUpdate, JobError>> + '_
    where
        F: FnMut(&Progress) + 'static,
    {
        let job = self.segmenter.borrow_mut().set_model(model);
        let started = job.map(|job| self.start_embedding(job, on_progress));
        async move {
            match started {
                Some(embedding) => embedding.await,
                None => Ok(SegmentUpdate::Unchanged),
            }
        }
    }

    /// Run the embedding again after it failed or was aborted.
    pub fn retry_embedding<F>(
        &self,
        on_progress: F,
    ) -> impl Future<Output = Result<SegmentUpdate, JobError>> + '_
    where
        F: FnMut(&Progress) + 'static,
    {
        let job = self.segmenter.borrow_mut().retry_embedding();
        let started = job.map(|job| self.start_embedding(job, on_progress));
        async move {
            match started {
                Some(embedding) => embedding.await,
                None => Ok(SegmentUpdate::Unchanged),
            }
        }
    }

    /// Click at normalized `(x, y)` on a canvas `canvas_width_px` wide.
    ///
    /// Adds or removes points and, if any remain, queries a new mask,
    /// cancelling the previous query.
    pub fn click<F>(
        &self,
        x: f64,
        y: f64,
        canvas_width_px: f64,
        on_progress: F,
    ) -> impl Future<Output = Result<SegmentUpdate, JobError>> + '_
    where
        F: FnMut(&Progress) + 'static,
    {
        let effect = self.segmenter.borrow_mut().click(x, y, canvas_width_px);
        let started = match effect {
            ClickEffect::Blocked => Started::Immediate(SegmentUpdate::Blocked),
            ClickEffect::MaskCleared => {
                self.controller.abort();
                Started::Immediate(SegmentUpdate::MaskCleared)
            }
            ClickEffect::Query { query, .. } => Started::Query {
                revision: query.revision,
                handle: self.controller.run(query.request, on_progress),
            },
        };
        async move {
            match started {
                Started::Immediate(update) => Ok(update),
                Started::Query { revision, handle } => self.finish_query(revision, handle.await),
            }
        }
    }

    /// Flip between foreground and background points.
    pub fn toggle_point_mode(&self) -> PointMode {
        self.segmenter.borrow_mut().toggle_point_mode()
    }

    /// Cancel the running job, if any.
    pub fn abort(&self) -> bool {
        self.controller.abort()
    }

    /// Drop the image, points and mask, cancelling any job.
    pub fn clear(&self) {
        self.controller.abort();
        self.segmenter.borrow_mut().clear();
    }

    /// Composite the current points (and `mask`, if decoded) over
    /// `image`.
    #[must_use]
    pub fn overlay(&self, image: &RgbaImage, mask: Option<&Mask>) -> RgbaImage {
        let segmenter = self.segmenter.borrow();
        composite::overlay(image, mask, segmenter.points(), segmenter.config())
    }

    fn start_embedding<F>(
        &self,
        job: EmbeddingJob,
        on_progress: F,
    ) -> impl Future<Output = Result<SegmentUpdate, JobError>> + '_
    where
        F: FnMut(&Progress) + 'static,
    {
        let progress = share(on_progress);
        let handle = self.controller.run(job.request, forward(&progress));
        let key = job.key;
        async move {
            match handle.await {
                Ok(JobOutcome::EmbeddingReady | JobOutcome::Completed(_)) => {
                    let follow_up = self.segmenter.borrow_mut().embedding_ready(&key);
                    if let Some(query) = follow_up {
                        let handle = self.controller.run(query.request, forward(&progress));
                        return self.finish_query(query.revision, handle.await);
                    }
                    if self.segmenter.borrow().is_ready() {
                        Ok(SegmentUpdate::EmbeddingReady)
                    } else {
                        Ok(SegmentUpdate::Discarded)
                    }
                }
                Ok(JobOutcome::Aborted) => {
                    self.segmenter.borrow_mut().embedding_failed(&key);
                    Ok(SegmentUpdate::Aborted)
                }
                Err(JobError::Superseded) => {
                    self.segmenter.borrow_mut().embedding_failed(&key);
                    Ok(SegmentUpdate::Discarded)
                }
                Err(error) => {
                    self.segmenter.borrow_mut().embedding_failed(&key);
                    Err(error)
                }
            }
        }
    }

    fn finish_query(
        &self,
        revision: u64,
        result: Result<JobOutcome, JobError>,
    ) -> Result<SegmentUpdate, JobError> {
        match result {
            Ok(JobOutcome::Completed(JobOutput::Mask(mask))) => {
                if self.segmenter.borrow_mut().mask_ready(revision, mask.clone()) {
                    Ok(SegmentUpdate::Mask(mask))
                } else {
                    Ok(SegmentUpdate::Discarded)
                }
            }
            Ok(JobOutcome::Completed(_) | JobOutcome::EmbeddingReady) => {
                Err(JobError::Protocol(MalformedOutput {
                    kind: JobKind::Segmentation,
                    reason: "point-query finished without a mask".to_owned(),
                }))
            }
            Ok(JobOutcome::Aborted) => Ok(SegmentUpdate::Aborted),
            Err(JobError::Superseded) => Ok(SegmentUpdate::Discarded),
            Err(error) => Err(error),
        }
    }
}

/// A chat with a text generation model.
///
/// Fragments stream into the [`Conversation`] as they arrive; the
/// caller's callback sees the same progress afterwards.
pub struct ChatSession<C: TaskChannel> {
    controller: JobController<C>,
    conversation: Rc<RefCell<Conversation>>,
    model: Cell<&'static ModelEntry>,
    params: GenerationParams,
}

impl<C: TaskChannel> ChatSession<C> {
    /// A chat over `channel` with the default text model and a fresh
    /// greeting.
    #[must_use]
    pub fn new(channel: C, params: GenerationParams) -> Self {
        Self {
            controller: JobController::new(channel),
            conversation: Rc::new(RefCell::new(Conversation::new())),
            model: Cell::new(default_model(JobKind::TextGeneration)),
            params,
        }
    }

    /// The transcript so far. Do not hold the borrow across an await.
    #[must_use]
    pub fn conversation(&self) -> Ref<'_, Conversation> {
        self.conversation.borrow()
    }

    /// Model used for the next message.
    #[must_use]
    pub fn model(&self) -> &'static ModelEntry {
        self.model.get()
    }

    /// Use `model` from the next message on.
    pub fn set_model(&self, model: &'static ModelEntry) {
        self.model.set(model);
    }

    /// Send a user message and generate the reply.
    ///
    /// Resolves with the final output, or `None` if generation was
    /// aborted. A message sent while a reply is still streaming cancels
    /// that reply.
    pub fn send<'a, F>(
        &'a self,
        text: &str,
        mut on_progress: F,
    ) -> impl Future<Output = Result<Option<TextOutput>, JobError>> + use<'a, C, F>
    where
        F: FnMut(&Progress) + 'static,
    {
        let prompt = self.conversation.borrow_mut().push_user(text);
        let request =
            JobRequest::text_generation(self.model.get(), &prompt, &self.params, random_seed());
        let conversation = Rc::clone(&self.conversation);
        let handle = self.controller.run(request, move |progress: &Progress| {
            if let Progress::Generating(Some(fragment)) = progress {
                conversation.borrow_mut().append_fragment(fragment);
            }
            on_progress(progress);
        });
        async move {
            match handle.await? {
                JobOutcome::Completed(JobOutput::Text(output)) => {
                    let mut conversation = self.conversation.borrow_mut();
                    if conversation.reply().is_some_and(str::is_empty) {
                        conversation.append_fragment(&output.text);
                    }
                    Ok(Some(output))
                }
                JobOutcome::Aborted => Ok(None),
                JobOutcome::Completed(_) | JobOutcome::EmbeddingReady => {
                    Err(JobError::Protocol(MalformedOutput {
                        kind: JobKind::TextGeneration,
                        reason: "generation finished without text".to_owned(),
                    }))
                }
            }
        }
    }

    /// Stop the reply in progress. Text streamed so far stays in the
    /// conversation.
    pub fn abort(&self) -> bool {
        self.controller.abort()
    }
}

/// Transcribe the audio at `audio_locator`.
///
/// Resolves with `None` if the job was aborted.
pub fn transcribe<'a, C, F>(
    controller: &'a JobController<C>,
    model: &ModelEntry,
    audio_locator: &str,
    on_progress: F,
) -> impl Future<Output = Result<Option<Transcript>, JobError>> + use<'a, C, F>
where
    C: TaskChannel,
    F: FnMut(&Progress) + 'static,
{
    let handle = controller.run(JobRequest::transcription(model, audio_locator), on_progress);
    async move {
        match handle.await? {
            JobOutcome::Completed(JobOutput::Transcript(transcript)) => Ok(Some(transcript)),
            JobOutcome::Aborted => Ok(None),
            JobOutcome::Completed(_) | JobOutcome::EmbeddingReady => {
                Err(JobError::Protocol(MalformedOutput {
                    kind: JobKind::Transcription,
                    reason: "transcription finished without segments".to_owned(),
                }))
            }
        }
    }
}
