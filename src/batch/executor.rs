//! Executor seam between the scheduler and the transport.
//!
//! The scheduler drives many request/response cycles without knowing how a
//! single command is run; the [`Client`](crate::client::Client) provides
//! the production implementation, and tests substitute instrumented stubs.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::command::Command;
use crate::Result;

/// Runs one command to completion against the transport.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command`, returning its output text on success.
    ///
    /// Implementations should observe `cancel` at their own suspension
    /// points; the scheduler never aborts an execution that has already
    /// been admitted.
    ///
    /// # Errors
    ///
    /// Any error — transport-fatal, semantic failure reported by the agent,
    /// or cancellation — is recorded by the scheduler as a failed result
    /// entry for this command, never raised as a batch failure.
    async fn execute(&self, command: &Command, cancel: &CancellationToken) -> Result<String>;
}
