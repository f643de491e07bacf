//! Decoded agent stream events.

use serde_json::Value;

/// Tool name the agent uses to ask the operator a question.
///
/// A non-interactive run cannot answer it, so the agent falls back to plain
/// text; the transcript treats the invocation as a signal only.
pub const ASK_USER_QUESTION: &str = "AskUserQuestion";

/// One line of the agent's output stream after decoding.
///
/// The set of variants is closed: every shape the decoder does not know maps
/// to [`DecodedEvent::Unrecognized`] and is dropped by the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    /// Text content of a model turn.
    TurnContent {
        /// Stable identifier of the turn (the agent's message id).
        turn_id: String,
        /// Concatenated text blocks of the turn.
        text: String,
    },
    /// Authoritative terminal answer of the exchange.
    FinalResult {
        /// Result text.
        text: String,
    },
    /// The agent invoked a named capability (tool).
    CapabilityInvocation {
        /// Capability name.
        name: String,
        /// Raw invocation parameters.
        parameters: Value,
    },
    /// Incremental text fragment.
    Delta {
        /// Fragment text.
        text: String,
    },
    /// Explicit error reported by the agent.
    ProtocolError {
        /// Human-readable error description.
        message: String,
    },
    /// A well-formed record with a discriminant this crate does not handle.
    Unrecognized {
        /// The discriminant value.
        kind: String,
    },
}

impl DecodedEvent {
    /// Whether this event is an invocation of the ask-user capability.
    #[must_use]
    pub fn is_ask_user_question(&self) -> bool {
        matches!(self, Self::CapabilityInvocation { name, .. } if name == ASK_USER_QUESTION)
    }
}
