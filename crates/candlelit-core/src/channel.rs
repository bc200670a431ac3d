//! The pipe between an orchestrator and one execution unit.
//!
//! [`TaskChannel`] is the seam between the sans-IO job controller and a
//! concrete transport. The browser implementation wraps a
//! `web_sys::Worker` (see `candlelit-io`); [`MemoryChannel`] keeps the
//! unit on the calling thread.
//!
//! Channels are single-threaded: the inbound handler is invoked on the
//! orchestrator's thread, once per message, in the order the unit
//! produced them.

use std::cell::RefCell;
use std::rc::Rc;

use crate::protocol::Command;
use crate::status::StatusMessage;

/// Callback receiving every inbound status message.
pub type MessageHandler = Box<dyn FnMut(StatusMessage)>;

/// Errors raised while talking to an execution unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel has been disposed.
    #[error("execution unit has been terminated")]
    Closed,

    /// The command could not be serialized.
    #[error("failed to encode command: {0}")]
    Encode(String),

    /// The transport rejected the message.
    #[error("failed to post message: {0}")]
    Post(String),
}

/// A bidirectional message pipe to one execution unit.
///
/// Creating a channel starts the unit; [`dispose`](Self::dispose)
/// terminates it. Implementations should also terminate on drop.
pub trait TaskChannel {
    /// Post one command to the unit.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the channel is closed or the command
    /// cannot be delivered.
    fn send(&self, command: &Command) -> Result<(), ChannelError>;

    /// Install the handler for inbound messages, replacing any previous
    /// one.
    fn set_handler(&self, handler: MessageHandler);

    /// Ask the unit to abandon its current job.
    ///
    /// Best effort: the unit may finish, or keep streaming for a while,
    /// before it notices.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    fn cancel(&self) -> Result<(), ChannelError> {
        self.send(&Command::Abort)
    }

    /// Terminate the unit. Further sends fail with
    /// [`ChannelError::Closed`].
    fn dispose(&self);
}

#[derive(Default)]
struct MemoryInner {
    sent: Vec<Command>,
    handler: Option<MessageHandler>,
    closed: bool,
}

/// An in-process channel.
///
/// Sent commands are queued for the owner to inspect with
/// [`take_sent`](Self::take_sent); statuses are injected with
/// [`deliver`](Self::deliver), which runs the handler synchronously.
/// Clones share the same queue, so one clone can be handed to a
/// controller while another plays the execution unit.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemoryChannel {
    /// A fresh, open channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the commands sent so far.
    #[must_use]
    pub fn take_sent(&self) -> Vec<Command> {
        std::mem::take(&mut self.inner.borrow_mut().sent)
    }

    /// Number of commands waiting in the queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().sent.len()
    }

    /// `true` once [`dispose`](TaskChannel::dispose) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Deliver a status message as if the unit had posted it.
    ///
    /// Returns `false` if no handler is installed or the channel is
    /// closed. The handler may send commands on this same channel.
    pub fn deliver(&self, message: StatusMessage) -> bool {
        let handler = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return false;
            }
            inner.handler.take()
        };
        let Some(mut handler) = handler else {
            return false;
        };
        handler(message);
        let mut inner = self.inner.borrow_mut();
        // Keep a handler installed during the call if there is one.
        if inner.handler.is_none() {
            inner.handler = Some(handler);
        }
        true
    }
}

impl TaskChannel for MemoryChannel {
    fn send(&self, command: &Command) -> Result<(), ChannelError> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Err(ChannelError::Closed);
        }
        inner.sent.push(command.clone());
        Ok(())
    }

    fn set_handler(&self, handler: MessageHandler) {
        self.inner.borrow_mut().handler = Some(handler);
    }

    fn dispose(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.closed = true;
        inner.handler = None;
    }
}
