//! Transcript accumulator.
//!
//! Holds the ordered conversation history and applies decoded agent events
//! to it. Each assistant message moves through `no open turn → accumulating
//! → closed`:
//!
//! - turn content and deltas append to the open assistant message when it is
//!   the last message, otherwise they open a new one;
//! - a final result always becomes a new, closed message;
//! - a turn id already applied in the current send cycle is ignored, so an
//!   agent that re-emits an unchanged turn does not duplicate text.
//!
//! The accumulator is plain data with no interior locking; the session actor
//! is its only owner.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::models::event::DecodedEvent;
use crate::models::message::{Message, Role};

/// What [`Transcript::apply`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A new assistant message was appended.
    Appended,
    /// Text was merged into the open assistant message.
    Merged,
    /// The turn was already applied this cycle; nothing changed.
    Duplicate,
    /// Only the activity indicator changed.
    ActivityChanged,
    /// The agent reported an error; the transcript is unchanged.
    Diagnostic(String),
    /// The event carries nothing for the transcript.
    Ignored,
}

/// Ordered conversation history plus per-cycle merge state.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Index of the assistant message still accepting text.
    open: Option<usize>,
    /// Turn ids applied in the current send cycle.
    seen_turns: HashSet<String>,
    /// Capability the agent is currently invoking, if any.
    activity: Option<String>,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new send cycle: forget seen turns and close the open message.
    pub fn begin_cycle(&mut self) {
        self.seen_turns.clear();
        self.open = None;
        self.activity = None;
    }

    /// Append the caller's message. Closes any open assistant message.
    pub fn push_user(&mut self, text: impl Into<String>) -> &Message {
        self.open = None;
        self.messages.push(Message::user(text));
        &self.messages[self.messages.len() - 1]
    }

    /// Append a closed assistant message.
    pub fn push_assistant(&mut self, text: impl Into<String>) -> &Message {
        self.open = None;
        self.messages.push(Message::assistant(text));
        &self.messages[self.messages.len() - 1]
    }

    /// Clear transient state once the agent process has ended.
    pub fn end_cycle(&mut self) {
        self.open = None;
        self.activity = None;
    }

    /// Apply one decoded event.
    pub fn apply(&mut self, event: DecodedEvent) -> Applied {
        match event {
            DecodedEvent::TurnContent { turn_id, text } => {
                if !self.seen_turns.insert(turn_id.clone()) {
                    trace!(turn_id, "transcript: duplicate turn ignored");
                    return Applied::Duplicate;
                }
                self.append_text(&text)
            }
            DecodedEvent::Delta { text } => self.append_text(&text),
            DecodedEvent::FinalResult { text } => {
                self.activity = None;
                self.push_assistant(text);
                Applied::Appended
            }
            DecodedEvent::CapabilityInvocation { ref name, .. } => {
                if event.is_ask_user_question() {
                    // Cannot be answered in a non-interactive run; the agent
                    // continues in plain text, so no question state is kept.
                    debug!("transcript: ask-user invocation, clearing pending question");
                    self.activity = None;
                } else {
                    debug!(capability = name.as_str(), "transcript: capability invoked");
                    self.activity = Some(name.clone());
                }
                Applied::ActivityChanged
            }
            DecodedEvent::ProtocolError { message } => Applied::Diagnostic(message),
            DecodedEvent::Unrecognized { .. } => Applied::Ignored,
        }
    }

    /// All messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The most recent message.
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the transcript has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Capability the agent is currently invoking.
    #[must_use]
    pub fn activity(&self) -> Option<&str> {
        self.activity.as_deref()
    }

    /// Whether the last message is an assistant message still accepting text.
    #[must_use]
    pub fn is_turn_open(&self) -> bool {
        self.open_index().is_some()
    }

    fn open_index(&self) -> Option<usize> {
        let last = self.messages.len().checked_sub(1)?;
        self.open
            .filter(|&idx| idx == last && self.messages[idx].role == Role::Assistant)
    }

    fn append_text(&mut self, text: &str) -> Applied {
        self.activity = None;
        if let Some(idx) = self.open_index() {
            self.messages[idx].content.push_str(text);
            return Applied::Merged;
        }
        self.messages.push(Message::assistant(text));
        self.open = Some(self.messages.len() - 1);
        Applied::Appended
    }
}
