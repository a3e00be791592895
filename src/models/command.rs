//! Batch command model.
//!
//! A [`Command`] is one typed operation executed against the agent; a
//! [`CommandList`] is an ordered batch of independent commands plus the
//! concurrency policy they run under. Commands are immutable after
//! construction and never depend on each other within a batch unless the
//! batch runs sequentially.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConduitError, Result};

/// Typed command operations the scheduler understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Read and summarize a file.
    Read,
    /// Write or modify a file.
    Write,
    /// Search the workspace.
    Search,
    /// Analyze code structure or quality.
    Analyze,
    /// Report git working-tree status.
    GitStatus,
    /// Run the project's tests.
    Test,
    /// Explain a piece of code.
    Explain,
}

impl CommandKind {
    /// Imperative verb used when rendering the command as a prompt.
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::Search => "Search for",
            Self::Analyze => "Analyze",
            Self::GitStatus => "Show the git status of",
            Self::Test => "Run the tests for",
            Self::Explain => "Explain",
        }
    }
}

/// One typed operation with positional arguments and validated options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Command {
    /// Operation kind.
    pub kind: CommandKind,
    /// Positional arguments (paths, patterns, identifiers).
    pub args: Vec<String>,
    /// Open-ended pass-through options, validated to non-empty keys.
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Free-form context prepended to the rendered prompt.
    #[serde(default)]
    pub context: Option<String>,
}

impl Command {
    /// Construct a command with no options or context.
    #[must_use]
    pub fn new(kind: CommandKind, args: Vec<String>) -> Self {
        Self {
            kind,
            args,
            options: HashMap::new(),
            context: None,
        }
    }

    /// Attach free-form context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Attach one pass-through option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Validate required arguments before any subprocess interaction.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Validation`] when a kind that requires
    /// positional arguments has none, or an option key is empty.
    pub fn validate(&self) -> Result<()> {
        let needs_args = !matches!(self.kind, CommandKind::GitStatus | CommandKind::Test);
        if needs_args && self.args.iter().all(|a| a.trim().is_empty()) {
            return Err(ConduitError::Validation(
                format!("command `{:?}` requires at least one argument", self.kind),
                None,
            ));
        }
        if self.options.keys().any(|k| k.trim().is_empty()) {
            return Err(ConduitError::Validation(
                "command option keys must not be empty".into(),
                None,
            ));
        }
        Ok(())
    }

    /// Render the command as a single prompt line for the agent.
    #[must_use]
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::new();
        if let Some(ref context) = self.context {
            prompt.push_str(context);
            prompt.push_str("\n\n");
        }
        prompt.push_str(self.kind.verb());
        for arg in &self.args {
            prompt.push(' ');
            prompt.push_str(arg);
        }
        if !self.options.is_empty() {
            // Deterministic option ordering for stable prompts.
            let mut pairs: Vec<_> = self.options.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());
            prompt.push_str(" (");
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    prompt.push_str(", ");
                }
                prompt.push_str(k);
                prompt.push('=');
                prompt.push_str(v);
            }
            prompt.push(')');
        }
        prompt
    }
}

/// Execution policy for a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Commands run strictly in order.
    #[default]
    Sequential,
    /// Commands run concurrently under the parallelism bound.
    Parallel,
    /// Reserved mode for dependency analysis; executed as Sequential.
    DependencyInferred,
}

impl ExecutionMode {
    /// Whether this mode admits more than one command in flight.
    #[must_use]
    pub fn is_parallel(self) -> bool {
        matches!(self, Self::Parallel)
    }
}

/// Ordered batch of commands plus its execution policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandList {
    /// Commands in submission order.
    pub commands: Vec<Command>,
    /// Concurrency policy.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// In sequential mode, halt after the first failing command.
    #[serde(default)]
    pub stop_on_error: bool,
    /// Parallelism bound for [`ExecutionMode::Parallel`]; clamped to
    /// `min(max(1, max_parallel), commands.len())` at execution time.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
    4
}

impl CommandList {
    /// Construct a sequential batch.
    #[must_use]
    pub fn sequential(commands: Vec<Command>) -> Self {
        Self {
            commands,
            mode: ExecutionMode::Sequential,
            stop_on_error: false,
            max_parallel: default_max_parallel(),
        }
    }

    /// Construct a parallel batch with the given bound.
    #[must_use]
    pub fn parallel(commands: Vec<Command>, max_parallel: usize) -> Self {
        Self {
            commands,
            mode: ExecutionMode::Parallel,
            stop_on_error: false,
            max_parallel,
        }
    }

    /// Effective number of commands in flight at once.
    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        self.max_parallel.max(1).min(self.commands.len().max(1))
    }
}

/// Outcome of one command in a batch.
///
/// An individual failure is a recorded entry, never a batch-level error;
/// commands that were never started (stop-on-error short circuit, batch
/// cancellation) have no entry at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandResult {
    /// The originating command; identifies which batch entry this result
    /// belongs to.
    pub command: Command,
    /// Whether the command succeeded end to end.
    pub success: bool,
    /// Agent output for successful commands.
    pub output: Option<String>,
    /// Failure summary for failed commands.
    pub error: Option<String>,
    /// Wall-clock execution time for this command.
    pub duration: Duration,
}

/// Aggregate outcome of one batch execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchReport {
    /// Per-command results, preserving submission order as a subsequence.
    /// Commands that were never started leave no entry, so the list may be
    /// shorter than the batch and may skip positions; match entries to
    /// inputs through [`CommandResult::command`], not by index.
    pub results: Vec<CommandResult>,
    /// Number of commands in the submitted batch.
    pub total: usize,
    /// Number of commands that ran and succeeded.
    pub succeeded: usize,
    /// Number of commands that ran and failed.
    pub failed: usize,
    /// Human-readable per-command failure summaries.
    pub errors: Vec<String>,
    /// Wall-clock time from batch start to last completion.
    pub duration: Duration,
}
