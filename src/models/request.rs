//! Request model: what one exchange with the agent process asks for.
//!
//! A [`Request`] is immutable once submitted; all construction goes through
//! [`Request::new`] plus the builder-style `with_*` methods, which consume
//! `self` so a submitted request can never be mutated in place.

use serde::{Deserialize, Serialize};

/// Role tag for one conversational message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Caller-supplied input.
    User,
    /// Agent-produced output.
    Assistant,
}

/// One role-tagged message in a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// Plain-text message content.
    pub content: String,
}

impl Message {
    /// Construct a user-authored message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Construct an assistant-authored message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Permission mode forwarded to the agent CLI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// CLI default behavior.
    #[default]
    Default,
    /// Auto-accept file edits.
    AcceptEdits,
    /// Plan-only mode; no mutations.
    Plan,
    /// Skip all permission prompts.
    BypassPermissions,
}

/// One typed request against the agent process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Request {
    /// Ordered conversation history; the last entry is the active prompt.
    pub messages: Vec<Message>,
    /// Optional system instruction.
    pub system: Option<String>,
    /// Model identifier override; `None` uses the configured default.
    pub model: Option<String>,
    /// Best-effort output token hint. Some CLI versions silently ignore
    /// unsupported tuning flags; acceptance does not imply effect.
    pub max_tokens: Option<u32>,
    /// Best-effort sampling temperature hint.
    pub temperature: Option<f32>,
    /// Permission mode forwarded to the CLI.
    pub permission_mode: PermissionMode,
    /// Tool names the agent may use; empty means CLI default.
    pub allowed_tools: Vec<String>,
    /// Tool names the agent must not use.
    pub disallowed_tools: Vec<String>,
    /// Whether the exchange streams incremental events.
    pub stream: bool,
}

impl Request {
    /// Construct a streaming request from an ordered message list.
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            system: None,
            model: None,
            max_tokens: None,
            temperature: None,
            permission_mode: PermissionMode::Default,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            stream: true,
        }
    }

    /// Construct a single-prompt streaming request.
    #[must_use]
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    /// Attach a system instruction.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Override the model identifier.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the permission mode.
    #[must_use]
    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    /// The text of the most recent user message, if any.
    #[must_use]
    pub fn latest_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}
