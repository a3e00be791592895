//! Integration tests for the batch scheduler over a stub executor.
//!
//! Validates:
//! - sequential ordering and stop-on-error short circuit
//! - parallel execution under the concurrency bound, submission-ordered
//!   results
//! - cancellation semantics: started commands finish, waiting ones never
//!   run, and surviving entries stay an order-preserving subsequence

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_conduit::batch::{CommandExecutor, CommandScheduler};
use agent_conduit::errors::{ConduitError, Result};
use agent_conduit::models::command::{Command, CommandKind, CommandList, ExecutionMode};
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Stub executor that fails commands whose first argument starts with
/// `fail`, tracks in-flight concurrency, and signals the first admission.
struct StubExecutor {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
    first_admission: Notify,
}

impl StubExecutor {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            first_admission: Notify::new(),
        })
    }

    fn max_observed(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for StubExecutor {
    async fn execute(&self, command: &Command, _cancel: &CancellationToken) -> Result<String> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.first_admission.notify_waiters();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let arg = command.args.first().cloned().unwrap_or_default();
        if arg.starts_with("fail") {
            Err(ConduitError::Transport(format!("{arg} broke")))
        } else {
            Ok(format!("done {arg}"))
        }
    }
}

fn read_command(arg: &str) -> Command {
    Command::new(CommandKind::Read, vec![arg.to_owned()])
}

/// Sequential batch with stop-on-error: the failing command is the last
/// entry, later commands never start.
#[tokio::test]
async fn sequential_stop_on_error_short_circuits() {
    let executor = StubExecutor::new(Duration::from_millis(5));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let mut list = CommandList::sequential(vec![
        read_command("a.rs"),
        read_command("fail-b.rs"),
        read_command("c.rs"),
    ]);
    list.stop_on_error = true;

    let report = scheduler
        .execute(&list, CancellationToken::new())
        .await
        .expect("batch runs");

    assert_eq!(report.total, 3);
    assert_eq!(report.results.len(), 2, "third command must never start");
    assert!(report.results[0].success);
    assert!(!report.results[1].success);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(executor.started_count(), 2);
}

/// Without stop-on-error, a sequential batch records the failure and keeps
/// going.
#[tokio::test]
async fn sequential_failure_is_an_entry_not_an_error() {
    let executor = StubExecutor::new(Duration::from_millis(5));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let list = CommandList::sequential(vec![
        read_command("a.rs"),
        read_command("fail-b.rs"),
        read_command("c.rs"),
    ]);

    let report = scheduler
        .execute(&list, CancellationToken::new())
        .await
        .expect("batch runs");

    assert_eq!(report.results.len(), 3);
    assert!(!report.results[1].success);
    assert_eq!(report.results[1].error.as_deref(), Some("transport: fail-b.rs broke"));
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
}

/// Sequential mode never overlaps commands.
#[tokio::test]
async fn sequential_runs_one_at_a_time() {
    let executor = StubExecutor::new(Duration::from_millis(10));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let list = CommandList::sequential(
        (0..4).map(|i| read_command(&format!("f{i}.rs"))).collect(),
    );
    scheduler
        .execute(&list, CancellationToken::new())
        .await
        .expect("batch runs");

    assert_eq!(executor.max_observed(), 1, "sequential mode must not overlap");
}

/// A parallel batch of five under a bound of two never exceeds two in
/// flight, and results stay in submission order.
#[tokio::test]
async fn parallel_respects_bound_and_order() {
    let executor = StubExecutor::new(Duration::from_millis(25));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let names: Vec<String> = (0..5).map(|i| format!("file{i}.rs")).collect();
    let list = CommandList::parallel(
        names.iter().map(|n| read_command(n)).collect(),
        2,
    );

    let report = scheduler
        .execute(&list, CancellationToken::new())
        .await
        .expect("batch runs");

    assert!(
        executor.max_observed() <= 2,
        "bound violated: {} in flight",
        executor.max_observed()
    );
    assert_eq!(report.results.len(), 5);
    for (result, name) in report.results.iter().zip(&names) {
        assert_eq!(&result.command.args[0], name, "results must keep submission order");
        assert_eq!(result.output.as_deref(), Some(format!("done {name}").as_str()));
    }
    assert_eq!(report.succeeded, 5);
    assert_eq!(report.failed, 0);
}

/// A scheduler-level ceiling caps the batch even when the list declares a
/// higher bound of its own.
#[tokio::test]
async fn parallelism_ceiling_overrides_the_list_bound() {
    let executor = StubExecutor::new(Duration::from_millis(25));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor))
        .with_parallelism_ceiling(2);

    let list = CommandList::parallel(
        (0..5).map(|i| read_command(&format!("f{i}.rs"))).collect(),
        5,
    );
    let report = scheduler
        .execute(&list, CancellationToken::new())
        .await
        .expect("batch runs");

    assert!(
        executor.max_observed() <= 2,
        "ceiling violated: {} in flight",
        executor.max_observed()
    );
    assert_eq!(report.results.len(), 5);
    assert_eq!(report.succeeded, 5);
}

/// A zero bound is clamped up to one instead of deadlocking the batch.
#[tokio::test]
async fn parallel_zero_bound_is_clamped_to_one() {
    let executor = StubExecutor::new(Duration::from_millis(5));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let list = CommandList::parallel(vec![read_command("a.rs"), read_command("b.rs")], 0);
    let report = scheduler
        .execute(&list, CancellationToken::new())
        .await
        .expect("batch runs");

    assert_eq!(report.results.len(), 2);
    assert_eq!(executor.max_observed(), 1);
}

/// Cancellation after the first admission lets the in-flight command finish
/// and keeps every waiting command from starting.
#[tokio::test]
async fn cancellation_stops_admission_but_not_in_flight_work() {
    let executor = StubExecutor::new(Duration::from_millis(100));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let list = CommandList::parallel(
        (0..4).map(|i| read_command(&format!("f{i}.rs"))).collect(),
        1,
    );
    let cancel = CancellationToken::new();

    let admitted = executor.first_admission.notified();
    let execute = scheduler.execute(&list, cancel.clone());
    tokio::pin!(execute);

    // Wait until the first command is actually running, then cancel.
    tokio::select! {
        () = admitted => cancel.cancel(),
        report = &mut execute => panic!("batch finished before admission: {report:?}"),
    }
    let report = execute.await.expect("cancelled batch still reports");

    assert_eq!(report.results.len(), 1, "only the admitted command ran");
    assert!(report.results[0].success, "in-flight work runs to completion");
    assert_eq!(report.total, 4);
    assert_eq!(executor.started_count(), 1);
}

/// Cancellation before execution is a batch-level error: nothing ran, so
/// there is no report to return.
#[tokio::test]
async fn pre_cancelled_batch_is_an_error() {
    let executor = StubExecutor::new(Duration::from_millis(5));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let list = CommandList::sequential(vec![read_command("a.rs")]);
    let result = scheduler.execute(&list, cancel).await;
    assert!(
        matches!(result, Err(ConduitError::Cancelled(_))),
        "pre-cancelled batch must error, got {result:?}"
    );
    assert_eq!(executor.started_count(), 0);
}

/// An empty batch is a validation error, never an empty report.
#[tokio::test]
async fn empty_batch_is_a_validation_error() {
    let executor = StubExecutor::new(Duration::from_millis(5));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let list = CommandList::sequential(Vec::new());
    let result = scheduler.execute(&list, CancellationToken::new()).await;
    assert!(matches!(result, Err(ConduitError::Validation(..))));
}

/// A malformed command fails the whole batch up front; no command starts.
#[tokio::test]
async fn invalid_command_fails_validation_before_any_run() {
    let executor = StubExecutor::new(Duration::from_millis(5));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let list = CommandList::sequential(vec![
        read_command("a.rs"),
        Command::new(CommandKind::Search, Vec::new()),
    ]);
    let result = scheduler.execute(&list, CancellationToken::new()).await;
    assert!(matches!(result, Err(ConduitError::Validation(..))));
    assert_eq!(executor.started_count(), 0, "validation precedes admission");
}

/// Executor that cancels the batch token while running any command whose
/// first argument starts with `stop`.
struct CancelOnMarker {
    delay: Duration,
}

#[async_trait]
impl CommandExecutor for CancelOnMarker {
    async fn execute(&self, command: &Command, cancel: &CancellationToken) -> Result<String> {
        let arg = command.args.first().cloned().unwrap_or_default();
        if arg.starts_with("stop") {
            cancel.cancel();
        }
        tokio::time::sleep(self.delay).await;
        Ok(format!("done {arg}"))
    }
}

/// Under mid-batch cancellation with a bound above one, entries for the
/// commands that ran keep their relative submission order and identify
/// their originating command; never-admitted commands may leave gaps, so
/// matching by index is not part of the contract.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_batch_preserves_submission_order_as_subsequence() {
    let executor: Arc<dyn CommandExecutor> = Arc::new(CancelOnMarker {
        delay: Duration::from_millis(20),
    });
    let scheduler = CommandScheduler::new(executor);

    let commands: Vec<Command> = (0..8)
        .map(|i| {
            if i == 1 {
                read_command("stop-1")
            } else {
                read_command(&format!("cmd-{i}"))
            }
        })
        .collect();
    let list = CommandList::parallel(commands.clone(), 3);

    let report = scheduler
        .execute(&list, CancellationToken::new())
        .await
        .expect("cancelled batch still reports");

    assert_eq!(report.total, 8);
    assert!(!report.results.is_empty(), "the cancelling command ran");

    let positions: Vec<usize> = report
        .results
        .iter()
        .map(|result| {
            commands
                .iter()
                .position(|command| command == &result.command)
                .expect("every entry identifies a submitted command")
        })
        .collect();
    assert!(
        positions.windows(2).all(|pair| pair[0] < pair[1]),
        "entries must keep submission order: {positions:?}"
    );
    for result in &report.results {
        let arg = &result.command.args[0];
        assert_eq!(
            result.output.as_deref(),
            Some(format!("done {arg}").as_str()),
            "entries must carry the output of their own command"
        );
    }
}

/// DependencyInferred is reserved and executes sequentially.
#[tokio::test]
async fn dependency_inferred_runs_sequentially() {
    let executor = StubExecutor::new(Duration::from_millis(10));
    let scheduler = CommandScheduler::new(Arc::<StubExecutor>::clone(&executor));

    let mut list = CommandList::sequential(
        (0..3).map(|i| read_command(&format!("f{i}.rs"))).collect(),
    );
    list.mode = ExecutionMode::DependencyInferred;

    let report = scheduler
        .execute(&list, CancellationToken::new())
        .await
        .expect("batch runs");
    assert_eq!(report.results.len(), 3);
    assert_eq!(executor.max_observed(), 1);
}
