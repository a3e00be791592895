//! Bounded-concurrency command scheduler.
//!
//! Executes an ordered [`CommandList`] either strictly sequentially or with
//! semaphore-bounded parallelism. Results preserve submission order as a
//! subsequence, regardless of completion order; each entry carries its
//! originating command, so entries stay self-identifying even when the
//! subsequence has gaps. Commands that were never admitted (stop-on-error
//! short circuit, batch cancellation) are absent from the results, which is
//! how "not run" stays distinguishable from "ran and failed" — and under
//! mid-batch cancellation an absent command may sit between two that ran.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::executor::CommandExecutor;
use crate::models::command::{
    BatchReport, Command, CommandList, CommandResult, ExecutionMode,
};
use crate::{ConduitError, Result};

/// Scheduler over a shared command executor.
pub struct CommandScheduler {
    executor: Arc<dyn CommandExecutor>,
    parallel_ceiling: usize,
}

impl std::fmt::Debug for CommandScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandScheduler").finish_non_exhaustive()
    }
}

impl CommandScheduler {
    /// Build a scheduler over the given executor.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            parallel_ceiling: usize::MAX,
        }
    }

    /// Cap the parallelism of every batch, whatever bound the list itself
    /// declares. A ceiling of zero is clamped to one.
    #[must_use]
    pub fn with_parallelism_ceiling(mut self, ceiling: usize) -> Self {
        self.parallel_ceiling = ceiling.max(1);
        self
    }

    /// Execute a batch under its declared concurrency policy.
    ///
    /// Validation runs before any command is admitted; a malformed batch
    /// never touches the transport. Cancellation via `cancel` stops
    /// admitting new work but lets in-flight commands finish; the report
    /// then contains entries only for commands that actually started.
    ///
    /// # Errors
    ///
    /// - [`ConduitError::Validation`] — empty batch or a command with
    ///   missing required arguments (setup error, nothing ran).
    /// - [`ConduitError::Cancelled`] — cancellation observed before any
    ///   command was admitted.
    pub async fn execute(
        &self,
        list: &CommandList,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        if list.commands.is_empty() {
            return Err(ConduitError::Validation(
                "command list must not be empty".into(),
                None,
            ));
        }
        for command in &list.commands {
            command.validate()?;
        }
        if cancel.is_cancelled() {
            return Err(ConduitError::Cancelled(
                "batch cancelled before any command started".into(),
            ));
        }

        let started = Instant::now();
        let results = match list.mode {
            // DependencyInferred is reserved; it executes as Sequential.
            ExecutionMode::Sequential | ExecutionMode::DependencyInferred => {
                self.run_sequential(list, &cancel).await
            }
            ExecutionMode::Parallel => self.run_parallel(list, &cancel).await,
        };

        let report = build_report(list.commands.len(), results, started);
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "batch finished"
        );
        Ok(report)
    }

    async fn run_sequential(
        &self,
        list: &CommandList,
        cancel: &CancellationToken,
    ) -> Vec<CommandResult> {
        let mut results = Vec::with_capacity(list.commands.len());

        for (position, command) in list.commands.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(position, "sequential batch: cancellation, admission stopped");
                break;
            }

            let result = run_one(self.executor.as_ref(), command, cancel).await;
            let failed = !result.success;
            results.push(result);

            if failed && list.stop_on_error {
                debug!(position, "sequential batch: stop_on_error short circuit");
                break;
            }
        }
        results
    }

    async fn run_parallel(
        &self,
        list: &CommandList,
        cancel: &CancellationToken,
    ) -> Vec<CommandResult> {
        let bound = list.effective_parallelism().min(self.parallel_ceiling);
        let semaphore = Arc::new(Semaphore::new(bound));
        debug!(bound, commands = list.commands.len(), "parallel batch admission gate");

        let mut handles = Vec::with_capacity(list.commands.len());
        for (position, command) in list.commands.iter().cloned().enumerate() {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (position, None);
                };
                // Admission gate passed; cancellation from here on no
                // longer prevents this command from running, only commands
                // still waiting for a permit.
                if cancel.is_cancelled() {
                    return (position, None);
                }
                let result = run_one(executor.as_ref(), &command, &cancel).await;
                (position, Some(result))
            }));
        }

        let mut slots: Vec<Option<CommandResult>> = Vec::new();
        slots.resize_with(list.commands.len(), || None);
        for handle in handles {
            match handle.await {
                Ok((position, result)) => slots[position] = result,
                Err(err) => warn!(%err, "parallel batch: worker task panicked"),
            }
        }

        // Submission-order flatten: completion order never reorders entries.
        // Never-admitted commands leave no entry, so the result is a
        // subsequence of the input and may skip positions after a
        // cancellation.
        slots.into_iter().flatten().collect()
    }
}

/// Run one command, recording its outcome as a result entry.
async fn run_one(
    executor: &dyn CommandExecutor,
    command: &Command,
    cancel: &CancellationToken,
) -> CommandResult {
    let started = Instant::now();
    match executor.execute(command, cancel).await {
        Ok(output) => CommandResult {
            command: command.clone(),
            success: true,
            output: Some(output),
            error: None,
            duration: started.elapsed(),
        },
        Err(err) => CommandResult {
            command: command.clone(),
            success: false,
            output: None,
            error: Some(err.to_string()),
            duration: started.elapsed(),
        },
    }
}

fn build_report(total: usize, results: Vec<CommandResult>, started: Instant) -> BatchReport {
    let succeeded = results.iter().filter(|r| r.success).count();
    let failed = results.len() - succeeded;
    let errors = results
        .iter()
        .filter_map(|r| {
            r.error
                .as_ref()
                .map(|e| format!("{:?}: {e}", r.command.kind))
        })
        .collect();

    BatchReport {
        results,
        total,
        succeeded,
        failed,
        errors,
        duration: started.elapsed(),
    }
}
