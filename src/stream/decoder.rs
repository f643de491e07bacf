//! Agent event decoder.
//!
//! Turns one NDJSON line from the agent's output into a [`DecodedEvent`].
//! The agent's stream mixes lifecycle, diagnostic, and content records, and
//! may contain partial or non-JSON lines. Decoding therefore never fails:
//! anything that does not parse, or has no string `type` discriminant, is
//! dropped by returning `None`.
//!
//! # Known discriminants
//!
//! | `type`                | Maps to                                              |
//! |-----------------------|------------------------------------------------------|
//! | `assistant`           | [`DecodedEvent::TurnContent`] or [`DecodedEvent::CapabilityInvocation`] |
//! | `result`              | [`DecodedEvent::FinalResult`] or [`DecodedEvent::ProtocolError`] |
//! | `stream_event`        | [`DecodedEvent::Delta`] for wrapped text deltas      |
//! | `content_block_delta` | [`DecodedEvent::Delta`]                              |
//! | `error`               | [`DecodedEvent::ProtocolError`]                      |
//! | *(any other)*         | [`DecodedEvent::Unrecognized`]                       |

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::models::event::DecodedEvent;

// ── Wire shapes ───────────────────────────────────────────────────────────────

/// Top-level record envelope: the discriminant plus everything else.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    body: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AssistantRecord {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    id: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResultRecord {
    result: Option<String>,
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct StreamEventRecord {
    event: DeltaRecord,
}

#[derive(Debug, Deserialize)]
struct DeltaRecord {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    delta: Option<DeltaBody>,
}

#[derive(Debug, Deserialize)]
struct DeltaBody {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorRecord {
    error: Option<Value>,
    message: Option<String>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decode a single line of agent output.
///
/// # Return value
///
/// - `Some(event)` for any well-formed JSON object with a string `type`.
///   Unknown discriminants, and known ones whose payload has an unexpected
///   shape, come back as [`DecodedEvent::Unrecognized`].
/// - `None` for blank lines, invalid JSON, non-object JSON, and records
///   without a string `type`.
#[must_use]
pub fn decode_line(line: &str) -> Option<DecodedEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(err) => {
            trace!(error = %err, "decoder: dropping non-event line");
            return None;
        }
    };

    let event = match envelope.kind.as_str() {
        "assistant" => decode_assistant(envelope.body),
        "result" => decode_result(envelope.body),
        "stream_event" => decode_stream_event(envelope.body),
        "content_block_delta" => decode_delta(envelope.body),
        "error" => decode_error(envelope.body),
        _ => None,
    };

    Some(event.unwrap_or_else(|| {
        debug!(kind = envelope.kind.as_str(), "decoder: unrecognized record");
        DecodedEvent::Unrecognized {
            kind: envelope.kind,
        }
    }))
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn parse_body<T: for<'de> Deserialize<'de>>(body: Map<String, Value>) -> Option<T> {
    serde_json::from_value(Value::Object(body)).ok()
}

/// A model turn: its text blocks, or failing that its first tool call.
fn decode_assistant(body: Map<String, Value>) -> Option<DecodedEvent> {
    let record: AssistantRecord = parse_body(body)?;
    let message = record.message;

    let mut text = String::new();
    let mut invocation = None;
    for block in message.content {
        match block {
            ContentBlock::Text { text: part } => text.push_str(&part),
            ContentBlock::ToolUse { name, input } => {
                if invocation.is_none() {
                    invocation = Some((name, input));
                }
            }
            ContentBlock::Other => {}
        }
    }

    if !text.is_empty() {
        // Without a turn id the text cannot be deduplicated; treat it as a
        // plain fragment.
        return Some(match message.id {
            Some(turn_id) => DecodedEvent::TurnContent { turn_id, text },
            None => DecodedEvent::Delta { text },
        });
    }

    invocation.map(|(name, parameters)| DecodedEvent::CapabilityInvocation { name, parameters })
}

fn decode_result(body: Map<String, Value>) -> Option<DecodedEvent> {
    let record: ResultRecord = parse_body(body)?;

    if record.is_error {
        let message = record
            .result
            .filter(|r| !r.is_empty())
            .or(record.subtype)
            .unwrap_or_else(|| "agent reported an error".to_owned());
        return Some(DecodedEvent::ProtocolError { message });
    }

    record.result.map(|text| DecodedEvent::FinalResult { text })
}

fn decode_stream_event(body: Map<String, Value>) -> Option<DecodedEvent> {
    let record: StreamEventRecord = parse_body(body)?;
    if record.event.kind.as_deref() != Some("content_block_delta") {
        return None;
    }
    text_delta(record.event.delta)
}

fn decode_delta(body: Map<String, Value>) -> Option<DecodedEvent> {
    let record: DeltaRecord = parse_body(body)?;
    text_delta(record.delta)
}

fn text_delta(delta: Option<DeltaBody>) -> Option<DecodedEvent> {
    let delta = delta?;
    if delta.kind != "text_delta" {
        return None;
    }
    delta.text.map(|text| DecodedEvent::Delta { text })
}

fn decode_error(body: Map<String, Value>) -> Option<DecodedEvent> {
    let record: ErrorRecord = parse_body(body)?;

    let message = match record.error {
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
    .or(record.message)
    .unwrap_or_else(|| "agent reported an error".to_owned());

    Some(DecodedEvent::ProtocolError { message })
}
