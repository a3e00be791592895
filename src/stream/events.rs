//! Typed streaming events and their NDJSON wire mapping.
//!
//! Each stdout line that looks structured decodes into one [`EventPayload`]
//! via the `type` discriminator. The parser wraps payloads into
//! [`StreamEvent`]s stamped with the local arrival time; events are
//! immutable value objects from then on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::{StopReason, Usage};

/// `message_start` payload: identity of the message being streamed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct MessageStart {
    /// Message identity assigned by the source.
    #[serde(default)]
    pub id: String,
    /// Authoring role.
    #[serde(default)]
    pub role: String,
    /// Producing model, when reported.
    #[serde(default)]
    pub model: Option<String>,
    /// Initial usage counters, when reported.
    #[serde(default)]
    pub usage: Usage,
}

/// `content_block_start` payload: the opening shape of one block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ContentBlockStart {
    /// Block kind discriminator (`text`, `tool_use`, ...).
    #[serde(rename = "type", default = "default_block_kind")]
    pub kind: String,
    /// Text the block opens with, usually empty.
    #[serde(default)]
    pub text: String,
}

fn default_block_kind() -> String {
    "text".into()
}

/// `content_block_delta` payload: an incremental patch to one block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ContentDelta {
    /// Delta kind discriminator (`text_delta`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Appended text.
    #[serde(default)]
    pub text: String,
}

/// `message_delta` payload: in-progress stop-reason/usage updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct MessageDelta {
    /// Stop reason, once the source knows it.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

/// `error` payload: a diagnostic reported by the source mid-stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ErrorPayload {
    /// Error kind discriminator.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// Tagged wire event, discriminated by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A new message begins; replaces any in-progress accumulator.
    MessageStart {
        /// Opening message identity.
        message: MessageStart,
    },
    /// A content block opens at the given index.
    ContentBlockStart {
        /// Advisory source index.
        index: usize,
        /// Opening block shape.
        content_block: ContentBlockStart,
    },
    /// Incremental content for the indexed block.
    ContentBlockDelta {
        /// Advisory source index.
        index: usize,
        /// The patch.
        delta: ContentDelta,
    },
    /// The indexed block is complete.
    ContentBlockStop {
        /// Advisory source index.
        index: usize,
    },
    /// Stop-reason/usage updates for the in-progress message.
    MessageDelta {
        /// Merged fields.
        delta: MessageDelta,
        /// Usage counters, last-write-wins.
        #[serde(default)]
        usage: Option<Usage>,
    },
    /// Terminal event for one exchange.
    MessageStop {
        /// Final usage counters, when reported.
        #[serde(default)]
        usage: Option<Usage>,
    },
    /// Mid-stream diagnostic; does not by itself close the stream.
    Error {
        /// The reported error.
        error: ErrorPayload,
    },
}

impl EventPayload {
    /// Advisory block index for block-indexed variants.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::ContentBlockStart { index, .. }
            | Self::ContentBlockDelta { index, .. }
            | Self::ContentBlockStop { index } => Some(*index),
            _ => None,
        }
    }

    /// Whether this is the terminal event of an exchange.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop { .. })
    }
}

/// One discrete, typed notification of streaming progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamEvent {
    /// Local arrival timestamp.
    pub received_at: DateTime<Utc>,
    /// The decoded wire payload.
    pub payload: EventPayload,
}

impl StreamEvent {
    /// Wrap a payload with the current arrival time.
    #[must_use]
    pub fn now(payload: EventPayload) -> Self {
        Self {
            received_at: Utc::now(),
            payload,
        }
    }
}
