//! Future-based job control over a [`TaskChannel`].
//!
//! A [`JobController`] owns one channel (and so one execution unit) and
//! runs at most one job on it at a time. Starting a job while another
//! is in flight cancels the old one first and resolves its
//! [`JobHandle`] with [`JobError::Superseded`]: the last caller wins.
//!
//! Each start command carries a fresh generation number. The unit
//! echoes it back, and the controller drops every message whose
//! generation is not the current job's, so a superseded job can never
//! leak progress into its successor even though cancellation is only
//! best effort.
//!
//! A unit that does not echo generations is handled by counting: every
//! cancelled job still owes one terminal status, and the unit works
//! through jobs in order. While any is owed, untagged messages belong
//! to a cancelled job and are dropped, each terminal one settling a
//! debt. Once none is owed, untagged messages go to the current job.
//!
//! The controller never accumulates streamed output; each
//! [`Progress`] is handed to the caller's callback as it arrives.
//! Callbacks run on the orchestrator's thread and must not block.

#![allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{self, Either};
use web_time::Instant;

use crate::channel::{ChannelError, TaskChannel};
use crate::protocol::{Command, JobKind, JobRequest};
use crate::status::{JobOutput, JobStatus, MalformedOutput, Progress, StatusMessage, Terminal};

/// How a job ended without failing.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// `complete`, with the kind-specific output.
    Completed(JobOutput),
    /// `completeEmbedding`: the image embedding is cached in the unit.
    EmbeddingReady,
    /// The job was cancelled, by [`JobController::abort`] or by the unit.
    Aborted,
}

/// Why a job produced no outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    /// No execution unit is attached to the controller.
    #[error("no execution unit is available")]
    ChannelNotReady,

    /// The execution unit reported an error. The message is shown to
    /// the user as-is.
    #[error("{0}")]
    Execution(String),

    /// A newer job replaced this one. Callers discard silently.
    #[error("job was superseded by a newer request")]
    Superseded,

    /// The caller's deadline passed before a terminal status arrived.
    #[error("job did not finish in time")]
    TimedOut,

    /// The channel failed to carry the request.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The unit's output did not match the job kind.
    #[error(transparent)]
    Protocol(#[from] MalformedOutput),
}

type JobResult = Result<JobOutcome, JobError>;
type ProgressCallback = Rc<RefCell<dyn FnMut(&Progress)>>;

struct ActiveJob {
    generation: u64,
    kind: JobKind,
    started: Instant,
    on_progress: ProgressCallback,
    done: oneshot::Sender<JobResult>,
}

impl ActiveJob {
    fn finish(self, result: JobResult) {
        let elapsed_ms = self.started.elapsed().as_millis();
        match &result {
            Ok(outcome) => tracing::debug!(
                generation = self.generation,
                kind = self.kind.label(),
                elapsed_ms,
                ?outcome,
                "job finished"
            ),
            Err(error) => tracing::debug!(
                generation = self.generation,
                kind = self.kind.label(),
                elapsed_ms,
                %error,
                "job failed"
            ),
        }
        // The handle may have been dropped; nobody is waiting then.
        let _ = self.done.send(result);
    }
}

#[derive(Default)]
struct ControllerState {
    generation: u64,
    active: Option<ActiveJob>,
    /// Cancelled jobs whose terminal status has not arrived yet.
    cancelled: u32,
}

impl ControllerState {
    /// Note that the unit will still send one terminal status for a job
    /// it was told to cancel.
    fn cancel_active(&mut self) -> Option<ActiveJob> {
        let job = self.active.take()?;
        self.cancelled += 1;
        Some(job)
    }

    /// Whether `message` belongs to an earlier job than the current one.
    fn is_stale(&self, message: &StatusMessage) -> bool {
        match message.generation {
            Some(generation) => self.active.as_ref().map(|job| job.generation) != Some(generation),
            None => self.cancelled > 0,
        }
    }
}

/// Runs jobs on one execution unit, one at a time.
pub struct JobController<C: TaskChannel> {
    channel: Option<C>,
    state: Rc<RefCell<ControllerState>>,
}

impl<C: TaskChannel> JobController<C> {
    /// Take ownership of `channel` and start listening to it.
    #[must_use]
    pub fn new(channel: C) -> Self {
        let mut controller = Self::detached();
        controller.attach(channel);
        controller
    }

    /// A controller with no execution unit yet. Every
    /// [`run`](Self::run) fails with [`JobError::ChannelNotReady`]
    /// until [`attach`](Self::attach) is called.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            channel: None,
            state: Rc::new(RefCell::new(ControllerState::default())),
        }
    }

    /// Attach (or replace) the execution unit.
    ///
    /// A previous unit is disposed and its in-flight job, if any,
    /// resolves as superseded.
    pub fn attach(&mut self, channel: C) {
        let weak = Rc::downgrade(&self.state);
        channel.set_handler(Box::new(move |message| {
            if let Some(state) = weak.upgrade() {
                route(&state, message);
            }
        }));
        if let Some(previous) = self.channel.replace(channel) {
            previous.dispose();
        }
        let orphan = {
            let mut state = self.state.borrow_mut();
            state.cancelled = 0;
            state.active.take()
        };
        if let Some(job) = orphan {
            job.finish(Err(JobError::Superseded));
        }
    }

    /// The attached channel.
    #[must_use]
    pub const fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    /// `true` while a job is waiting for its terminal status.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.borrow().active.is_some()
    }

    /// Generation of the job in flight, if any.
    #[must_use]
    pub fn current_generation(&self) -> Option<u64> {
        self.state.borrow().active.as_ref().map(|job| job.generation)
    }

    /// Start a job and return a handle that resolves on its terminal
    /// status.
    ///
    /// The request is sent before this returns; a job already in
    /// flight is cancelled first. `on_progress` receives every
    /// non-terminal status of this job, in arrival order, and nothing
    /// after the job ends or is superseded.
    pub fn run<F>(&self, request: JobRequest, on_progress: F) -> JobHandle
    where
        F: FnMut(&Progress) + 'static,
    {
        let Some(channel) = &self.channel else {
            return JobHandle::ready(Err(JobError::ChannelNotReady));
        };

        let previous = self.state.borrow_mut().cancel_active();
        if let Some(previous) = previous {
            tracing::debug!(
                generation = previous.generation,
                "cancelling in-flight job for a newer request"
            );
            if let Err(error) = channel.cancel() {
                tracing::warn!(%error, "failed to send cancellation");
            }
            previous.finish(Err(JobError::Superseded));
        }

        let generation = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            state.generation
        };
        let kind = request.kind();
        let command = Command::Start {
            generation,
            request,
        };
        if let Err(error) = channel.send(&command) {
            tracing::warn!(generation, %error, "failed to start job");
            return JobHandle::ready(Err(error.into()));
        }
        tracing::debug!(generation, kind = kind.label(), "job started");

        let (done, receiver) = oneshot::channel();
        self.state.borrow_mut().active = Some(ActiveJob {
            generation,
            kind,
            started: Instant::now(),
            on_progress: Rc::new(RefCell::new(on_progress)),
            done,
        });
        JobHandle {
            generation: Some(generation),
            inner: HandleInner::Pending(receiver),
        }
    }

    /// Like [`run`](Self::run), but give up when `deadline` completes
    /// first: the job is aborted and the caller gets
    /// [`JobError::TimedOut`].
    ///
    /// The deadline can be any future, e.g. a `gloo-timers` timeout in
    /// the browser.
    pub fn run_with_deadline<'a, F, D>(
        &'a self,
        request: JobRequest,
        on_progress: F,
        deadline: D,
    ) -> impl Future<Output = JobResult> + 'a
    where
        F: FnMut(&Progress) + 'static,
        D: Future<Output = ()> + 'a,
    {
        let handle = self.run(request, on_progress);
        async move {
            let generation = handle.generation();
            let deadline = std::pin::pin!(deadline);
            match future::select(handle, deadline).await {
                Either::Left((result, _)) => result,
                Either::Right(((), _)) => {
                    if generation.is_some() && self.current_generation() == generation {
                        tracing::warn!(?generation, "job deadline passed, aborting");
                        self.abort();
                    }
                    Err(JobError::TimedOut)
                }
            }
        }
    }

    /// Cancel the job in flight.
    ///
    /// The abort command is sent without waiting for the unit to
    /// acknowledge it; the job resolves immediately with
    /// [`JobOutcome::Aborted`] and its callback receives nothing more.
    /// Returns `false` if no job was running.
    pub fn abort(&self) -> bool {
        let job = self.state.borrow_mut().cancel_active();
        let Some(job) = job else {
            return false;
        };
        if let Some(channel) = &self.channel
            && let Err(error) = channel.cancel()
        {
            tracing::warn!(%error, "failed to send cancellation");
        }
        job.finish(Ok(JobOutcome::Aborted));
        true
    }
}

impl<C: TaskChannel> Drop for JobController<C> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.dispose();
        }
    }
}

/// Dispatch one inbound message to the job in flight.
fn route(state: &RefCell<ControllerState>, message: StatusMessage) {
    let (kind, on_progress) = {
        let mut state = state.borrow_mut();
        if state.is_stale(&message) {
            if message.is_terminal() {
                state.cancelled = state.cancelled.saturating_sub(1);
            }
            tracing::debug!(
                generation = ?message.generation,
                status = ?message.status,
                owed = state.cancelled,
                "dropping status from superseded job"
            );
            return;
        }
        let Some(job) = state.active.as_ref() else {
            tracing::debug!(status = ?message.status, "dropping status with no job in flight");
            return;
        };
        (job.kind, Rc::clone(&job.on_progress))
    };

    let result = match JobStatus::decode(kind, &message) {
        Ok(None) => return,
        Ok(Some(JobStatus::Progress(progress))) => {
            match on_progress.try_borrow_mut() {
                Ok(mut callback) => (*callback)(&progress),
                Err(_) => tracing::warn!("progress callback re-entered, status dropped"),
            }
            return;
        }
        Ok(Some(JobStatus::Terminal(terminal))) => match terminal {
            Terminal::Complete(output) => Ok(JobOutcome::Completed(output)),
            Terminal::CompleteEmbedding => Ok(JobOutcome::EmbeddingReady),
            Terminal::Aborted => Ok(JobOutcome::Aborted),
            Terminal::Failed(message) => Err(JobError::Execution(message)),
        },
        Err(malformed) => {
            tracing::warn!(%malformed, "rejecting job with malformed output");
            Err(malformed.into())
        }
    };

    let job = state.borrow_mut().active.take();
    if let Some(job) = job {
        job.finish(result);
    }
}

enum HandleInner {
    Ready(Option<JobResult>),
    Pending(oneshot::Receiver<JobResult>),
}

/// Resolves with the outcome of one job.
///
/// Dropping the handle does not cancel the job; use
/// [`JobController::abort`] for that.
#[must_use = "a job handle only reports the outcome when awaited"]
pub struct JobHandle {
    generation: Option<u64>,
    inner: HandleInner,
}

impl JobHandle {
    fn ready(result: JobResult) -> Self {
        Self {
            generation: None,
            inner: HandleInner::Ready(Some(result)),
        }
    }

    /// Generation assigned to the job, or `None` if it was never sent.
    #[must_use]
    pub const fn generation(&self) -> Option<u64> {
        self.generation
    }
}

impl Future for JobHandle {
    type Output = JobResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            HandleInner::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(JobError::Superseded)))
            }
            // A dropped sender means the controller went away mid-job.
            HandleInner::Pending(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(JobError::Superseded))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::channel::MemoryChannel;
    use crate::registry::default_model;
    use crate::types::MaskRef;

    fn recorder() -> (Rc<RefCell<Vec<Progress>>>, impl FnMut(&Progress) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |p: &Progress| sink.borrow_mut().push(p.clone()))
    }

    fn embedding_request() -> JobRequest {
        JobRequest::embedding(default_model(JobKind::Segmentation), "blob:image")
    }

    fn text_request() -> JobRequest {
        JobRequest::text_generation(
            default_model(JobKind::TextGeneration),
            "USER: hi",
            &crate::config::GenerationParams::default(),
            1,
        )
    }

    fn started_generations(sent: &[Command]) -> Vec<Option<u64>> {
        sent.iter()
            .map(|c| match c {
                Command::Start { generation, .. } => Some(*generation),
                Command::Abort => None,
            })
            .collect()
    }

    #[test]
    fn detached_controller_rejects_without_sending() {
        let controller = JobController::<MemoryChannel>::detached();
        let result = block_on(controller.run(embedding_request(), |_| {}));
        assert_eq!(result, Err(JobError::ChannelNotReady));
    }

    #[test]
    fn request_is_sent_before_run_returns() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let _handle = controller.run(embedding_request(), |_| {});
        assert_eq!(started_generations(&channel.take_sent()), vec![Some(1)]);
        assert!(controller.is_running());
    }

    #[test]
    fn progress_is_forwarded_then_terminal_resolves() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let (seen, on_progress) = recorder();
        let handle = controller.run(embedding_request(), on_progress);

        channel.deliver(StatusMessage::status("loading").with_generation(1));
        channel.deliver(StatusMessage::status("embedding").with_generation(1));
        channel.deliver(StatusMessage::status("complete-embedding").with_generation(1));

        assert_eq!(block_on(handle), Ok(JobOutcome::EmbeddingReady));
        assert_eq!(*seen.borrow(), vec![Progress::Loading, Progress::Embedding]);
        assert!(!controller.is_running());
    }

    #[test]
    fn execution_error_rejects_with_message() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let handle = controller.run(embedding_request(), |_| {});
        channel.deliver(
            StatusMessage::status("loading")
                .with_generation(1)
                .with_sentence("ignored"),
        );
        channel.deliver(StatusMessage::error("failed to fetch weights").with_generation(1));
        assert_eq!(
            block_on(handle),
            Err(JobError::Execution("failed to fetch weights".into()))
        );
    }

    #[test]
    fn newer_job_supersedes_older() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let (seen_a, progress_a) = recorder();
        let (seen_b, progress_b) = recorder();

        let job_a = controller.run(text_request(), progress_a);
        channel.deliver(
            StatusMessage::status("generating")
                .with_generation(1)
                .with_sentence("a1"),
        );
        let job_b = controller.run(text_request(), progress_b);

        assert_eq!(
            started_generations(&channel.take_sent()),
            vec![Some(1), None, Some(2)]
        );
        assert_eq!(block_on(job_a), Err(JobError::Superseded));

        // Late traffic from A, then B's own.
        channel.deliver(
            StatusMessage::status("generating")
                .with_generation(1)
                .with_sentence("a2"),
        );
        channel.deliver(StatusMessage::status("aborted").with_generation(1));
        channel.deliver(
            StatusMessage::status("generating")
                .with_generation(2)
                .with_sentence("b1"),
        );
        channel.deliver(
            StatusMessage::status("complete")
                .with_generation(2)
                .with_output(json!("b1")),
        );

        assert!(matches!(
            block_on(job_b),
            Ok(JobOutcome::Completed(JobOutput::Text(ref t))) if t.text == "b1"
        ));
        assert_eq!(
            *seen_a.borrow(),
            vec![Progress::Generating(Some("a1".into()))]
        );
        assert_eq!(
            *seen_b.borrow(),
            vec![Progress::Generating(Some("b1".into()))]
        );
    }

    #[test]
    fn abort_resolves_immediately_and_silences_progress() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let (seen, on_progress) = recorder();
        let handle = controller.run(text_request(), on_progress);

        channel.deliver(
            StatusMessage::status("generating")
                .with_generation(1)
                .with_sentence("Hello"),
        );
        assert!(controller.abort());
        channel.deliver(
            StatusMessage::status("generating")
                .with_generation(1)
                .with_sentence(" world"),
        );

        assert_eq!(block_on(handle), Ok(JobOutcome::Aborted));
        assert_eq!(
            *seen.borrow(),
            vec![Progress::Generating(Some("Hello".into()))]
        );
        assert_eq!(
            started_generations(&channel.take_sent()),
            vec![Some(1), None]
        );
        assert!(!controller.abort());
    }

    #[test]
    fn unit_reported_abort_resolves_aborted() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let handle = controller.run(text_request(), |_| {});
        channel.deliver(StatusMessage::status("aborted"));
        assert_eq!(block_on(handle), Ok(JobOutcome::Aborted));
    }

    #[test]
    fn untagged_messages_belong_to_current_job() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let (seen, on_progress) = recorder();
        let handle = controller.run(text_request(), on_progress);
        channel.deliver(StatusMessage::status("loading"));
        channel.deliver(StatusMessage::status("generating").with_sentence("hi"));
        channel.deliver(StatusMessage::status("complete").with_output(json!("hi")));
        assert!(matches!(
            block_on(handle),
            Ok(JobOutcome::Completed(JobOutput::Text(ref t))) if t.text == "hi"
        ));
        assert_eq!(
            *seen.borrow(),
            vec![Progress::Loading, Progress::Generating(Some("hi".into()))]
        );
    }

    #[test]
    fn untagged_late_messages_of_superseded_job_are_dropped() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let (seen_a, progress_a) = recorder();
        let (seen_b, progress_b) = recorder();

        let job_a = controller.run(text_request(), progress_a);
        channel.deliver(StatusMessage::status("generating").with_sentence("a1"));
        let job_b = controller.run(text_request(), progress_b);
        assert_eq!(block_on(job_a), Err(JobError::Superseded));

        // A winds down before the unit picks B up.
        channel.deliver(StatusMessage::status("generating").with_sentence("a2"));
        channel.deliver(StatusMessage::status("aborted"));
        channel.deliver(StatusMessage::status("generating").with_sentence("b1"));
        channel.deliver(StatusMessage::status("complete").with_output(json!("b1")));

        assert!(matches!(
            block_on(job_b),
            Ok(JobOutcome::Completed(JobOutput::Text(ref t))) if t.text == "b1"
        ));
        assert_eq!(
            *seen_a.borrow(),
            vec![Progress::Generating(Some("a1".into()))]
        );
        assert_eq!(
            *seen_b.borrow(),
            vec![Progress::Generating(Some("b1".into()))]
        );
    }

    #[test]
    fn superseded_job_finishing_normally_settles_its_debt() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let _job_a = controller.run(embedding_request(), |_| {});
        let job_b = controller.run(embedding_request(), |_| {});

        // A ignored the cancel and completed anyway.
        channel.deliver(StatusMessage::status("complete-embedding"));
        assert!(controller.is_running());
        channel.deliver(StatusMessage::status("complete-embedding"));
        assert_eq!(block_on(job_b), Ok(JobOutcome::EmbeddingReady));
    }

    #[test]
    fn untagged_abort_acknowledgment_does_not_end_next_job() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let _first = controller.run(text_request(), |_| {});
        assert!(controller.abort());

        let (seen, on_progress) = recorder();
        let second = controller.run(text_request(), on_progress);
        channel.deliver(StatusMessage::status("generating").with_sentence("late"));
        channel.deliver(StatusMessage::status("aborted"));
        assert!(controller.is_running());

        channel.deliver(StatusMessage::status("generating").with_sentence("fresh"));
        channel.deliver(StatusMessage::status("complete").with_output(json!("fresh")));
        assert!(matches!(
            block_on(second),
            Ok(JobOutcome::Completed(JobOutput::Text(ref t))) if t.text == "fresh"
        ));
        assert_eq!(
            *seen.borrow(),
            vec![Progress::Generating(Some("fresh".into()))]
        );
    }

    #[test]
    fn point_query_resolves_with_mask() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let points =
            crate::points::PointSet::from(vec![crate::points::Point::new(0.5, 0.5, true)]);
        let request =
            JobRequest::point_query(default_model(JobKind::Segmentation), "blob:i", &points)
                .unwrap();
        let handle = controller.run(request, |_| {});
        channel.deliver(
            StatusMessage::status("complete")
                .with_generation(1)
                .with_output(json!({"maskURL": "blob:mask"})),
        );
        assert_eq!(
            block_on(handle),
            Ok(JobOutcome::Completed(JobOutput::Mask(MaskRef::new(
                "blob:mask"
            ))))
        );
    }

    #[test]
    fn malformed_output_rejects_as_protocol_error() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let points =
            crate::points::PointSet::from(vec![crate::points::Point::new(0.5, 0.5, true)]);
        let request =
            JobRequest::point_query(default_model(JobKind::Segmentation), "blob:i", &points)
                .unwrap();
        let handle = controller.run(request, |_| {});
        channel.deliver(StatusMessage::status("complete").with_generation(1));
        assert!(matches!(block_on(handle), Err(JobError::Protocol(_))));
    }

    #[test]
    fn expired_deadline_aborts_the_job() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let result = block_on(controller.run_with_deadline(
            embedding_request(),
            |_| {},
            future::ready(()),
        ));
        assert_eq!(result, Err(JobError::TimedOut));
        assert_eq!(
            started_generations(&channel.take_sent()),
            vec![Some(1), None]
        );
        assert!(!controller.is_running());
    }

    #[test]
    fn job_finishing_first_beats_deadline() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let job = controller.run_with_deadline(embedding_request(), |_| {}, future::pending());
        channel.deliver(StatusMessage::status("completeEmbedding").with_generation(1));
        assert_eq!(block_on(job), Ok(JobOutcome::EmbeddingReady));
    }

    #[test]
    fn dropping_controller_disposes_channel() {
        let channel = MemoryChannel::new();
        let controller = JobController::new(channel.clone());
        let handle = controller.run(embedding_request(), |_| {});
        drop(controller);
        assert!(channel.is_closed());
        assert_eq!(block_on(handle), Err(JobError::Superseded));
    }

    #[test]
    fn attaching_a_new_channel_supersedes_and_disposes_the_old() {
        let first = MemoryChannel::new();
        let second = MemoryChannel::new();
        let mut controller = JobController::new(first.clone());
        let handle = controller.run(embedding_request(), |_| {});
        controller.attach(second.clone());
        assert!(first.is_closed());
        assert_eq!(block_on(handle), Err(JobError::Superseded));

        let handle = controller.run(embedding_request(), |_| {});
        second.deliver(StatusMessage::status("complete-embedding").with_generation(2));
        assert_eq!(block_on(handle), Ok(JobOutcome::EmbeddingReady));
    }
}
