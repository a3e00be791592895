//! Error types shared across the crate.
//!
//! Every failure mode carries a structured variant so callers can branch
//! programmatically ("did I cancel it, or did it break?") instead of
//! matching on message text. Classification helpers cover the taxonomy:
//! transport-fatal, parse-nonfatal, validation, and cancellation.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Crate error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConduitError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Caller input failed validation before any subprocess interaction.
    ///
    /// The second field optionally carries a suggested normalized
    /// alternative (used by session-id validation).
    Validation(String, Option<String>),
    /// The external executable could not be resolved on PATH.
    NotFound(String),
    /// The OS refused to spawn the process.
    Spawn(String),
    /// Write attempted against a closed stdin pipe or an exited process.
    ClosedPipe(String),
    /// Signal attempted against a process that is not running.
    NotRunning(String),
    /// Fatal transport failure: a pipe broke or the process exited before
    /// any terminal event was delivered.
    Transport(String),
    /// Non-fatal parse failure on one structured output line; the stream
    /// continues past it.
    Parse(String),
    /// Operation stopped by caller-initiated cancellation.
    Cancelled(String),
    /// Operation stopped by a deadline; a specialization of cancellation.
    Timeout(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl ConduitError {
    /// Whether this error aborted the stream or command and triggered full
    /// resource teardown.
    #[must_use]
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Spawn(_)
                | Self::ClosedPipe(_)
                | Self::Transport(_)
                | Self::Io(_)
        )
    }

    /// Whether this error was caused by the caller stopping the operation
    /// (explicit cancel or deadline), as opposed to the transport breaking.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::Timeout(_))
    }

    /// Whether correcting the input and retrying can succeed without any
    /// transport state change.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation(..) | Self::Parse(_))
    }
}

impl Display for ConduitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Validation(msg, Some(suggestion)) => {
                write!(f, "validation: {msg} (suggested: `{suggestion}`)")
            }
            Self::Validation(msg, None) => write!(f, "validation: {msg}"),
            Self::NotFound(msg) => write!(f, "executable not found: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn failed: {msg}"),
            Self::ClosedPipe(msg) => write!(f, "closed pipe: {msg}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for ConduitError {}

impl From<toml::de::Error> for ConduitError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for ConduitError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
