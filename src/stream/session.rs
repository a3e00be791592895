//! Streaming session: one cancellable exchange with an agent process.
//!
//! Wraps one supervised process plus one [`EventAssembler`] behind a lazy,
//! finite event sequence. A dedicated reader task consumes stdout lines,
//! forwards decoded events through a bounded channel, pushes non-fatal
//! parse errors onto a side channel, and settles exactly one terminal
//! outcome. Every exit path, including abandonment and cancellation, runs
//! the supervisor's stop so no process or pipe outlives the session.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::message::StreamMessage;
use crate::stream::events::{EventPayload, StreamEvent};
use crate::stream::parser::{classify_line, EventAssembler};
use crate::transport::supervisor::{LineStream, ProcessHandle, ProcessState, ProcessSupervisor};
use crate::{ConduitError, Result};

/// Capacity of the event channel between the reader task and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The single terminal outcome of one streaming exchange.
#[derive(Debug, Clone)]
pub enum StreamOutcome {
    /// `message_stop` observed; carries the assembled message.
    Completed(StreamMessage),
    /// Caller-initiated cancellation; the process is confirmed down.
    Cancelled,
    /// Transport-fatal failure; resources were released before delivery.
    Failed(ConduitError),
}

/// One cancellable streaming exchange against an agent process.
#[derive(Debug)]
pub struct StreamingSession {
    supervisor: Arc<ProcessSupervisor>,
    handle: ProcessHandle,
    events: mpsc::Receiver<StreamEvent>,
    parse_errors: mpsc::UnboundedReceiver<ConduitError>,
    outcome_rx: watch::Receiver<Option<StreamOutcome>>,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl StreamingSession {
    /// Start the reader task over an already-spawned process handle.
    ///
    /// `grace` is the period allowed between cooperative interrupt and
    /// forced kill during teardown. `startup` bounds the wait for the
    /// process's first stdout line; `None` disables the check. Once the
    /// first line has arrived the stream is only bounded by the caller's
    /// own deadline.
    #[must_use]
    pub fn start(
        supervisor: Arc<ProcessSupervisor>,
        handle: ProcessHandle,
        grace: Duration,
        startup: Option<Duration>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (parse_tx, parse_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(run_reader(ReaderContext {
            supervisor: Arc::clone(&supervisor),
            handle: handle.clone(),
            event_tx,
            parse_tx,
            outcome_tx,
            cancel: cancel.clone(),
            grace,
            startup,
        }));

        Self {
            supervisor,
            handle,
            events: event_rx,
            parse_errors: parse_rx,
            outcome_rx,
            cancel,
            reader: Some(reader),
        }
    }

    /// Handle of the underlying process. Borrowing callers may write or
    /// signal; lifecycle control stays with the session.
    #[must_use]
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Next event in source arrival order, or `None` once the sequence has
    /// closed (terminal outcome settled).
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Drain any pending non-fatal parse errors from the side channel.
    pub fn drain_parse_errors(&mut self) -> Vec<ConduitError> {
        let mut errors = Vec::new();
        while let Ok(err) = self.parse_errors.try_recv() {
            errors.push(err);
        }
        errors
    }

    /// Wait for the terminal outcome. Exactly one of completion,
    /// cancellation, or failure is ever delivered.
    pub async fn wait(&mut self) -> StreamOutcome {
        loop {
            if let Some(outcome) = self.outcome_rx.borrow().clone() {
                return outcome;
            }
            if self.outcome_rx.changed().await.is_err() {
                // Reader dropped without settling; treat as failure.
                return StreamOutcome::Failed(ConduitError::Transport(
                    "stream reader stopped without a terminal outcome".into(),
                ));
            }
        }
    }

    /// Cancel the exchange: cooperative interrupt first, then stop with the
    /// configured grace period. Returns only after the process is confirmed
    /// terminated and all pipes are closed.
    pub async fn cancel(&mut self) {
        if self.handle.state() == ProcessState::Running {
            if let Err(err) = self.supervisor.signal_interrupt(&self.handle) {
                debug!(handle_id = %self.handle.id(), %err, "interrupt before cancel skipped");
            }
        }
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            if let Err(err) = reader.await {
                warn!(handle_id = %self.handle.id(), %err, "stream reader join failed");
            }
        }
        info!(handle_id = %self.handle.id(), "stream cancelled and process reaped");
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        // An abandoned session must still tear the process down; the reader
        // task observes the token and runs the supervisor's stop.
        self.cancel.cancel();
    }
}

// ── Reader task ──────────────────────────────────────────────────────────────

struct ReaderContext {
    supervisor: Arc<ProcessSupervisor>,
    handle: ProcessHandle,
    event_tx: mpsc::Sender<StreamEvent>,
    parse_tx: mpsc::UnboundedSender<ConduitError>,
    outcome_tx: watch::Sender<Option<StreamOutcome>>,
    cancel: CancellationToken,
    grace: Duration,
    startup: Option<Duration>,
}

async fn run_reader(ctx: ReaderContext) {
    let ReaderContext {
        supervisor,
        handle,
        event_tx,
        parse_tx,
        outcome_tx,
        cancel,
        grace,
        mut startup,
    } = ctx;

    let mut framed = match supervisor.read_lines(&handle).await {
        Ok(framed) => framed,
        Err(err) => {
            supervisor.stop(&handle, grace).await;
            settle(&outcome_tx, StreamOutcome::Failed(err));
            return;
        }
    };

    let mut assembler = EventAssembler::new();
    let outcome = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(handle_id = %handle.id(), "stream reader: cancellation received");
                break StreamOutcome::Cancelled;
            }

            item = next_line(&mut framed, startup) => {
                startup = None;
                match item {
                    None => {
                        // EOF. Completeness is decided solely by whether
                        // message_stop was seen, never by text heuristics.
                        break eof_outcome(&supervisor, &handle, &mut assembler, grace).await;
                    }

                    Some(Err(err @ ConduitError::Timeout(_))) => {
                        warn!(handle_id = %handle.id(), %err, "stream reader: startup deadline expired");
                        break StreamOutcome::Failed(err);
                    }

                    Some(Err(err)) if err.is_recoverable() => {
                        // Over-long line: report on the side channel, keep
                        // reading from the next newline.
                        parse_tx.send(err).ok();
                    }

                    Some(Err(err)) => {
                        warn!(handle_id = %handle.id(), %err, "stream reader: io error");
                        break StreamOutcome::Failed(ConduitError::Transport(err.to_string()));
                    }

                    Some(Ok(line)) => {
                        match classify_line(&line) {
                            Ok(None) => {
                                // Incidental CLI chatter; silently dropped.
                            }
                            Err(err) => {
                                debug!(handle_id = %handle.id(), %err, "stream reader: skipping malformed line");
                                parse_tx.send(err).ok();
                            }
                            Ok(Some(payload)) => {
                                let terminal = assembler.apply(&payload);
                                if let Some(outcome) =
                                    deliver(&event_tx, &handle, payload, terminal, &mut assembler).await
                                {
                                    break outcome;
                                }
                            }
                        }
                    }
                }
            }
        }
    };

    // Resource release precedes the caller-visible terminal outcome on
    // every path.
    supervisor.stop(&handle, grace).await;
    settle(&outcome_tx, outcome);
}

/// Forward one decoded event; on the terminal event, settle completion.
async fn deliver(
    event_tx: &mpsc::Sender<StreamEvent>,
    handle: &ProcessHandle,
    payload: EventPayload,
    terminal: bool,
    assembler: &mut EventAssembler,
) -> Option<StreamOutcome> {
    if let EventPayload::Error { ref error } = payload {
        // Diagnostics are surfaced immediately but are not terminal; the
        // source may keep streaming.
        warn!(handle_id = %handle.id(), kind = %error.kind, message = %error.message, "stream error event");
    }

    if event_tx.send(StreamEvent::now(payload)).await.is_err() {
        debug!(handle_id = %handle.id(), "stream reader: consumer gone, stopping");
        return Some(StreamOutcome::Failed(ConduitError::Transport(
            "event consumer dropped mid-stream".into(),
        )));
    }

    if terminal {
        return Some(match assembler.take_message() {
            Some(message) => StreamOutcome::Completed(message),
            None => StreamOutcome::Failed(ConduitError::Transport(
                "message_stop before message_start".into(),
            )),
        });
    }
    None
}

/// Next framed line, bounded by the startup deadline until the first line
/// has arrived.
async fn next_line(
    framed: &mut LineStream,
    deadline: Option<Duration>,
) -> Option<Result<String>> {
    match deadline {
        None => framed.next().await,
        Some(limit) => match tokio::time::timeout(limit, framed.next()).await {
            Ok(item) => item,
            Err(_elapsed) => Some(Err(ConduitError::Timeout(format!(
                "no output within the {limit:?} startup window"
            )))),
        },
    }
}

/// Decide the outcome when stdout closed without a terminal event.
async fn eof_outcome(
    supervisor: &ProcessSupervisor,
    handle: &ProcessHandle,
    assembler: &mut EventAssembler,
    grace: Duration,
) -> StreamOutcome {
    if assembler.is_complete() {
        // message_stop normally breaks the loop before EOF.
        if let Some(message) = assembler.take_message() {
            return StreamOutcome::Completed(message);
        }
    }

    let exit = supervisor.wait_exit(handle, grace).await;
    let stderr_tail = supervisor.stderr_tail(handle).await;
    let detail = match exit {
        Ok(Some(code)) => format!("process exited with code {code} before message_stop"),
        Ok(None) => "process terminated by signal before message_stop".to_owned(),
        Err(err) => format!("process did not exit after stream closure: {err}"),
    };
    let full = if stderr_tail.is_empty() {
        detail
    } else {
        format!("{detail}; stderr: {}", stderr_tail.trim_end())
    };
    StreamOutcome::Failed(ConduitError::Transport(full))
}

/// Settle the terminal outcome exactly once.
fn settle(outcome_tx: &watch::Sender<Option<StreamOutcome>>, outcome: StreamOutcome) {
    outcome_tx.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(outcome);
            true
        } else {
            // Double delivery of terminal outcomes is a defect; keep the
            // first.
            false
        }
    });
}
