//! Incremental stream-event parsing and message assembly.
//!
//! [`classify_line`] turns one raw stdout line into the tri-state outcome
//! the reader loop needs: a decoded event, nothing (incidental CLI chatter
//! or an unknown event type), or a non-fatal parse error. The
//! [`EventAssembler`] folds decoded events into a [`StreamMessage`]
//! accumulator, tolerating out-of-order and dangling block indices.

use serde_json::Value;
use tracing::debug;

use crate::models::message::{ContentBlock, StreamMessage};
use crate::stream::events::EventPayload;
use crate::{ConduitError, Result};

/// Parse one raw stdout line into an event payload.
///
/// # Return value
///
/// - `Ok(Some(payload))` — a recognized structured event.
/// - `Ok(None)` — incidental chatter: empty lines, lines that do not open
///   with `{` or `[`, and structured lines with an unknown `type`.
/// - `Err(ConduitError::Parse(...))` — the line looks structured but does
///   not decode. Non-fatal: the caller skips it and the stream continues.
///
/// # Errors
///
/// [`ConduitError::Parse`] for structured-looking lines that fail to decode
/// or that carry a known `type` with a malformed body.
pub fn classify_line(line: &str) -> Result<Option<EventPayload>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| ConduitError::Parse(format!("malformed json: {e}")))?;

    // Owned copy: `value` is consumed by the typed decode below.
    let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(ConduitError::Parse("missing `type` discriminator".into()));
    };

    if !KNOWN_EVENT_TYPES.contains(&kind.as_str()) {
        debug!(event_type = %kind, "skipping unknown stream event type");
        return Ok(None);
    }

    let payload: EventPayload = serde_json::from_value(value)
        .map_err(|e| ConduitError::Parse(format!("malformed `{kind}` event: {e}")))?;
    Ok(Some(payload))
}

const KNOWN_EVENT_TYPES: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
    "error",
];

/// State machine folding event payloads into a message accumulator.
///
/// Initial state: no message. Terminal state: `message_stop` observed. The
/// assembler is the only mutator of its [`StreamMessage`]; once complete
/// the message is read-only.
#[derive(Debug, Default)]
pub struct EventAssembler {
    message: Option<StreamMessage>,
}

impl EventAssembler {
    /// Create an assembler with no message in progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulator built so far, if a message has started.
    #[must_use]
    pub fn message(&self) -> Option<&StreamMessage> {
        self.message.as_ref()
    }

    /// Whether `message_stop` has been observed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.message.as_ref().is_some_and(|m| m.complete)
    }

    /// Consume the finished message, leaving the assembler empty.
    #[must_use]
    pub fn take_message(&mut self) -> Option<StreamMessage> {
        self.message.take()
    }

    /// Fold one event payload into the accumulator.
    ///
    /// Returns `true` when the payload was the terminal `message_stop`.
    /// Events addressing a block index that never started are ignored;
    /// upstream is not required to validate indices.
    pub fn apply(&mut self, payload: &EventPayload) -> bool {
        match payload {
            EventPayload::MessageStart { message } => {
                // A fresh start replaces any prior accumulator.
                self.message = Some(StreamMessage {
                    id: message.id.clone(),
                    role: message.role.clone(),
                    model: message.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    usage: message.usage,
                    complete: false,
                });
                false
            }
            EventPayload::ContentBlockStart {
                index,
                content_block,
            } => {
                if let Some(ref mut msg) = self.message {
                    // Appended in arrival order; the index is advisory and
                    // may be non-contiguous.
                    msg.content.push(ContentBlock::new(
                        *index,
                        content_block.kind.clone(),
                        content_block.text.clone(),
                    ));
                }
                false
            }
            EventPayload::ContentBlockDelta { index, delta } => {
                if let Some(block) = self
                    .message
                    .as_mut()
                    .and_then(|m| m.block_at_mut(*index))
                {
                    block.text.push_str(&delta.text);
                }
                false
            }
            EventPayload::ContentBlockStop { index } => {
                if let Some(block) = self
                    .message
                    .as_mut()
                    .and_then(|m| m.block_at_mut(*index))
                {
                    block.finalized = true;
                }
                false
            }
            EventPayload::MessageDelta { delta, usage } => {
                if let Some(ref mut msg) = self.message {
                    if delta.stop_reason.is_some() {
                        msg.stop_reason = delta.stop_reason;
                    }
                    // Last-write-wins; counters are never summed here.
                    if let Some(u) = usage {
                        msg.usage = *u;
                    }
                }
                false
            }
            EventPayload::MessageStop { usage } => {
                if let Some(ref mut msg) = self.message {
                    if let Some(u) = usage {
                        msg.usage = *u;
                    }
                    msg.complete = true;
                }
                true
            }
            // Diagnostics are surfaced by the session's error path; they do
            // not alter the accumulator.
            EventPayload::Error { .. } => false,
        }
    }
}
