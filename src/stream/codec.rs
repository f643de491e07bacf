//! Line assembly for agent output streams.
//!
//! The agent writes newline-delimited JSON, but the OS hands the reader
//! arbitrary byte chunks: a record can be split across reads and one read can
//! carry several records. [`LineAssembler`] keeps the unterminated tail between
//! calls and only ever yields complete lines.
//!
//! Splitting happens on raw bytes before UTF-8 decoding, so a multibyte
//! character that straddles two chunks is reassembled intact.
//!
//! # Usage
//!
//! Feed chunks directly with [`LineAssembler::feed`], or use the assembler as
//! the codec parameter of [`tokio_util::codec::FramedRead`].
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use skill_relay::stream::codec::LineAssembler;
//!
//! let lines = FramedRead::new(child_stdout, LineAssembler::new());
//! ```

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{AppError, Result};

/// Default maximum line length used by the session: 16 MiB.
///
/// Tool results embedded in agent events can be large, so the bound is much
/// looser than a typical protocol frame limit.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Buffers byte chunks and yields complete newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    /// Bytes received after the last newline.
    pending: BytesMut,
    /// Optional upper bound on a single line.
    max_line_bytes: Option<usize>,
    /// True while skipping the remainder of an oversized line.
    discarding: bool,
}

impl LineAssembler {
    /// Create an unbounded assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler that discards lines longer than `max_line_bytes`.
    ///
    /// An oversized line is dropped up to and including its terminating
    /// newline; assembly resumes with the next line.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes: Some(max_line_bytes),
            ..Self::default()
        }
    }

    /// Number of buffered bytes not yet terminated by a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append `chunk` and return every line it completes, in order.
    ///
    /// The trailing segment after the last newline stays buffered until a
    /// later chunk terminates it or [`finish`](Self::finish) is called.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.exceeds_limit(head.len()) {
                self.reject_pending(head.len());
                continue;
            }

            self.pending.extend_from_slice(head);
            let raw = self.pending.split();
            lines.push(decode_line(&raw));
        }

        if !self.discarding {
            if self.exceeds_limit(rest.len()) {
                self.reject_pending(rest.len());
                self.discarding = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }

        lines
    }

    /// Surface the unterminated trailing fragment at end of stream.
    ///
    /// Returns `None` when nothing (or only whitespace) is buffered. The
    /// buffer is empty afterwards, so the fragment is never returned twice.
    pub fn finish(&mut self) -> Option<String> {
        self.discarding = false;
        if self.pending.is_empty() {
            return None;
        }
        let raw = self.pending.split();
        let line = decode_line(&raw);
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }

    fn exceeds_limit(&self, incoming: usize) -> bool {
        self.max_line_bytes
            .is_some_and(|max| self.pending.len() + incoming > max)
    }

    fn reject_pending(&mut self, incoming: usize) {
        warn!(
            line_bytes = self.pending.len() + incoming,
            max_line_bytes = self.max_line_bytes,
            "line assembler: discarding oversized line"
        );
        self.pending.clear();
    }
}

impl Decoder for LineAssembler {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line from `src`, or `Ok(None)` while buffering.
    ///
    /// An unterminated line that already exceeds the limit is dropped from
    /// `src` immediately; the rest of it is skipped as it arrives.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let newline = src.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        src.advance(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            let Some(pos) = newline else {
                if self.exceeds_limit(src.len()) {
                    self.reject_pending(src.len());
                    src.clear();
                    self.discarding = true;
                }
                return Ok(None);
            };
            let line = src.split_to(pos);
            src.advance(1);

            if self.exceeds_limit(line.len()) {
                self.reject_pending(line.len());
                continue;
            }
            return Ok(Some(decode_line(&line)));
        }
    }

    /// Decode the final, possibly unterminated, line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.discarding = false;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        let line = decode_line(&rest);
        Ok((!line.trim().is_empty()).then_some(line))
    }
}

/// Decode one line's bytes, dropping a trailing carriage return.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
