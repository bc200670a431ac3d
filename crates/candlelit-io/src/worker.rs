//! Task channels backed by dedicated web workers.
//!
//! [`WebWorkerChannel`] wraps a module `web_sys::Worker` running one of
//! the inference workers. Commands are posted as plain JS objects
//! (parsed from their JSON form); every message the worker posts back
//! is stringified and decoded into a [`StatusMessage`].
//!
//! A worker-level error event (script failed to load, uncaught
//! exception) is delivered as an `error` status so the job in flight
//! rejects instead of hanging.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use candlelit_core::{ChannelError, Command, JobKind, MessageHandler, StatusMessage, TaskChannel};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

/// Worker script for text generation.
pub const TEXT_GENERATION_WORKER: &str = "/wasm-tools/phi/worker.js";
/// Worker script for segmentation.
pub const SEGMENTATION_WORKER: &str = "/wasm-tools/segment-anything/worker.js";
/// Worker script for transcription.
pub const TRANSCRIPTION_WORKER: &str = "/wasm-tools/whisper/worker.js";

/// The worker script serving `kind`.
#[must_use]
pub const fn worker_script(kind: JobKind) -> &'static str {
    match kind {
        JobKind::TextGeneration => TEXT_GENERATION_WORKER,
        JobKind::Segmentation => SEGMENTATION_WORKER,
        JobKind::Transcription => TRANSCRIPTION_WORKER,
    }
}

/// Errors that can occur when starting a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The browser refused to create the worker.
    #[error("failed to start worker {script}: {reason}")]
    Spawn {
        /// Script URL.
        script: String,
        /// Browser error text.
        reason: String,
    },
}

#[derive(Default)]
struct Shared {
    handler: Option<MessageHandler>,
    closed: bool,
}

/// Hand `message` to the installed handler.
///
/// The handler is taken out for the duration of the call so it may
/// send on, or replace the handler of, its own channel.
fn dispatch(shared: &RefCell<Shared>, message: StatusMessage) {
    let taken = {
        let mut shared = shared.borrow_mut();
        if shared.closed {
            return;
        }
        shared.handler.take()
    };
    let Some(mut handler) = taken else {
        tracing::debug!(status = ?message.status, "worker message with no handler");
        return;
    };
    handler(message);
    let mut shared = shared.borrow_mut();
    if !shared.closed && shared.handler.is_none() {
        shared.handler = Some(handler);
    }
}

fn decode_message(data: &JsValue) -> Option<StatusMessage> {
    let json = js_sys::JSON::stringify(data).ok()?.as_string()?;
    match StatusMessage::from_json(&json) {
        Ok(message) => Some(message),
        Err(error) => {
            tracing::warn!(%error, "ignoring undecodable worker message");
            None
        }
    }
}

/// A [`TaskChannel`] to one module web worker.
///
/// The worker lives as long as the channel: dropping the channel (or
/// calling [`dispose`](TaskChannel::dispose)) terminates it.
pub struct WebWorkerChannel {
    worker: web_sys::Worker,
    shared: Rc<RefCell<Shared>>,
    _onmessage: Closure<dyn FnMut(web_sys::MessageEvent)>,
    _onerror: Closure<dyn FnMut(web_sys::ErrorEvent)>,
}

impl WebWorkerChannel {
    /// Start a module worker from `script_url`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Spawn`] if the browser cannot create the
    /// worker (e.g. outside a browser).
    pub fn spawn(script_url: &str) -> Result<Self, WorkerError> {
        let options = web_sys::WorkerOptions::new();
        options.set_type(web_sys::WorkerType::Module);
        let worker = web_sys::Worker::new_with_options(script_url, &options).map_err(|e| {
            WorkerError::Spawn {
                script: script_url.to_owned(),
                reason: format!("{e:?}"),
            }
        })?;

        let shared = Rc::new(RefCell::new(Shared::default()));

        let onmessage = {
            let shared = Rc::clone(&shared);
            Closure::<dyn FnMut(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
                if let Some(message) = decode_message(&event.data()) {
                    dispatch(&shared, message);
                }
            })
        };
        let onerror = {
            let shared = Rc::clone(&shared);
            Closure::<dyn FnMut(web_sys::ErrorEvent)>::new(move |event: web_sys::ErrorEvent| {
                tracing::warn!(message = %event.message(), "worker error event");
                dispatch(&shared, StatusMessage::error(event.message()));
            })
        };
        worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        worker.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        tracing::debug!(script = script_url, "worker started");

        Ok(Self {
            worker,
            shared,
            _onmessage: onmessage,
            _onerror: onerror,
        })
    }

    /// Start the worker that serves `kind`.
    ///
    /// # Errors
    ///
    /// See [`spawn`](Self::spawn).
    pub fn for_kind(kind: JobKind) -> Result<Self, WorkerError> {
        Self::spawn(worker_script(kind))
    }
}

impl TaskChannel for WebWorkerChannel {
    fn send(&self, command: &Command) -> Result<(), ChannelError> {
        if self.shared.borrow().closed {
            return Err(ChannelError::Closed);
        }
        let json = command
            .to_json()
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        let message =
            js_sys::JSON::parse(&json).map_err(|e| ChannelError::Encode(format!("{e:?}")))?;
        self.worker
            .post_message(&message)
            .map_err(|e| ChannelError::Post(format!("{e:?}")))
    }

    fn set_handler(&self, handler: MessageHandler) {
        self.shared.borrow_mut().handler = Some(handler);
    }

    fn dispose(&self) {
        let mut shared = self.shared.borrow_mut();
        if shared.closed {
            return;
        }
        shared.closed = true;
        shared.handler = None;
        self.worker.set_onmessage(None);
        self.worker.set_onerror(None);
        self.worker.terminate();
        tracing::debug!("worker terminated");
    }
}

impl Drop for WebWorkerChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A deadline for [`JobController::run_with_deadline`](candlelit_core::JobController::run_with_deadline)
/// driven by the browser's timer queue.
pub fn deadline(after: Duration) -> impl Future<Output = ()> {
    gloo_timers::future::sleep(after)
}
