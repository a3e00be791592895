//! Streamed message accumulator and its building blocks.
//!
//! A [`StreamMessage`] grows incrementally as streaming events arrive: blocks
//! are appended on `content_block_start`, patched on `content_block_delta`,
//! finalized on `content_block_stop`, and the whole message is sealed by
//! `message_stop`. Only the event assembler mutates it; once
//! [`StreamMessage::complete`] is set the value is read-only by convention.

use serde::{Deserialize, Serialize};

/// Reason the agent stopped producing output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// Output token limit reached.
    MaxTokens,
    /// A stop sequence matched.
    StopSequence,
    /// The agent paused to use a tool.
    ToolUse,
}

/// Token-equivalent usage counters for one exchange.
///
/// Values are last-write-wins from `message_delta` / `message_stop`; the
/// assembler never sums counters across messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Usage {
    /// Input-side token count.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output-side token count.
    #[serde(default)]
    pub output_tokens: u64,
}

/// One addressable unit of streamed content, identified by position index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ContentBlock {
    /// Index advertised by the source. Advisory: blocks are stored in
    /// arrival order and matched to deltas by this value, not by slot.
    pub index: usize,
    /// Block kind discriminator (e.g. `text`, `tool_use`).
    pub kind: String,
    /// Accumulated text content.
    pub text: String,
    /// Whether `content_block_stop` has been observed for this block.
    pub finalized: bool,
}

impl ContentBlock {
    /// Start a new block at the given source index.
    #[must_use]
    pub fn new(index: usize, kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            index,
            kind: kind.into(),
            text: text.into(),
            finalized: false,
        }
    }
}

/// Accumulator entity built incrementally from streaming events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamMessage {
    /// Message identity assigned by the source.
    pub id: String,
    /// Role tag reported by the source (normally `assistant`).
    pub role: String,
    /// Model that produced the message, when reported.
    pub model: Option<String>,
    /// Ordered content blocks, in arrival order.
    pub content: Vec<ContentBlock>,
    /// Stop reason, merged last-write-wins from `message_delta`.
    pub stop_reason: Option<StopReason>,
    /// Usage counters, finalized at `message_stop`.
    pub usage: Usage,
    /// Set once `message_stop` has been observed.
    pub complete: bool,
}

impl StreamMessage {
    /// Concatenated text of all content blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.iter().map(|b| b.text.as_str()).collect()
    }

    /// Mutable reference to the block matching a source index, if present.
    pub fn block_at_mut(&mut self, index: usize) -> Option<&mut ContentBlock> {
        self.content.iter_mut().find(|b| b.index == index)
    }
}
