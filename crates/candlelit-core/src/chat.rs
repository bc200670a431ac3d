//! Chat transcript for the text generation job.
//!
//! The model sees the whole conversation on every turn, rendered as
//! `ROLE: text` lines. The assistant reply being generated sits at the
//! end as an empty message, so the prompt ends in `ASSISTANT: ` and
//! streamed fragments are appended to it.

use serde::{Deserialize, Serialize};

/// Marker the model emits at the end of a reply.
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Opening line of every conversation.
pub const GREETING: &str = "Hello! How can I assist you today?";

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting.
    User,
    /// The model.
    Assistant,
}

impl Role {
    const fn prefix(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the turn.
    pub from: Role,
    /// Text so far; grows while the assistant is still generating.
    pub text: String,
}

/// An ordered list of messages, starting with the assistant greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            messages: vec![Message {
                from: Role::Assistant,
                text: GREETING.to_owned(),
            }],
        }
    }
}

impl Conversation {
    /// A conversation holding only the greeting.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All turns, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Add a user turn plus an empty assistant reply, and return the
    /// prompt for generating that reply.
    pub fn push_user(&mut self, text: impl Into<String>) -> String {
        self.messages.push(Message {
            from: Role::User,
            text: text.into(),
        });
        self.messages.push(Message {
            from: Role::Assistant,
            text: String::new(),
        });
        self.prompt()
    }

    /// Append a streamed fragment to the reply in progress, dropping
    /// any end-of-text markers.
    pub fn append_fragment(&mut self, fragment: &str) {
        let clean = fragment.replace(END_OF_TEXT, "");
        if clean.is_empty() {
            return;
        }
        match self.messages.last_mut() {
            Some(last) if last.from == Role::Assistant => last.text.push_str(&clean),
            _ => self.messages.push(Message {
                from: Role::Assistant,
                text: clean,
            }),
        }
    }

    /// The reply in progress, or the last assistant message.
    #[must_use]
    pub fn reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.from == Role::Assistant)
            .map(|m| m.text.as_str())
    }

    /// All messages as `ROLE: text` lines.
    #[must_use]
    pub fn prompt(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.from.prefix(), m.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
