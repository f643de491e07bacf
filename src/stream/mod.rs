//! Agent output stream handling.
//!
//! The agent writes newline-delimited JSON events to its stdout (and free-form
//! diagnostics to stderr). This module turns those bytes into typed events:
//!
//! - `codec`: [`LineAssembler`](codec::LineAssembler) framing of raw chunks into lines.
//! - `decoder`: [`decode_line`](decoder::decode_line) mapping of one line to a
//!   [`DecodedEvent`](crate::models::event::DecodedEvent).
//! - `reader`: async task forwarding raw chunks from a pipe as [`ProcessEvent`]s.

pub mod codec;
pub mod decoder;
pub mod reader;

use bytes::Bytes;

/// Which of the agent's output pipes a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output: the event stream.
    Stdout,
    /// Standard error: diagnostics.
    Stderr,
}

/// How an agent process run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own. `code` is `None` when a signal ended it.
    Exited {
        /// Exit code, if any.
        code: Option<i32>,
    },
    /// The process was stopped because the caller cancelled the exchange.
    Cancelled,
    /// Delivering the prompt on stdin failed; the process was stopped.
    PromptWriteFailed(String),
    /// Waiting for the process failed.
    WaitFailed(String),
}

impl ExitOutcome {
    /// Whether the run counts as a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }
}

/// Message from a supervised process to the session that owns it.
///
/// For a given cycle, every `Output` is delivered before the single `Exited`.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A raw chunk read from one of the output pipes.
    Output {
        /// Send cycle the process belongs to.
        cycle: u64,
        /// Source pipe.
        stream: OutputStream,
        /// Bytes as read.
        chunk: Bytes,
    },
    /// The process has ended and both pipes are drained.
    Exited {
        /// Send cycle the process belongs to.
        cycle: u64,
        /// How the run ended.
        outcome: ExitOutcome,
    },
}
