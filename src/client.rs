//! Top-level client: the typed API over the subprocess transport.
//!
//! A [`Client`] owns one [`ProcessSupervisor`] and one [`SessionRegistry`];
//! construction and shutdown are explicit and there is no process-wide
//! state, so independent clients never interfere. Concurrency comes from
//! many process handles, never from sharing one: each exchange gets its own
//! process with a single writer and a single reader task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::batch::{CommandExecutor, CommandScheduler};
use crate::config::ConduitConfig;
use crate::models::command::{BatchReport, Command, CommandList};
use crate::models::message::StreamMessage;
use crate::models::request::{Request, Role};
use crate::session::registry::{Session, SessionRegistry};
use crate::stream::session::{StreamOutcome, StreamingSession};
use crate::transport::launch::LaunchSpec;
use crate::transport::supervisor::ProcessSupervisor;
use crate::{ConduitError, Result};

/// Client over one agent CLI installation.
#[derive(Debug)]
pub struct Client {
    config: Arc<ConduitConfig>,
    supervisor: Arc<ProcessSupervisor>,
    registry: Arc<SessionRegistry>,
}

impl Client {
    /// Construct a client from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Config`] when the configuration fails
    /// validation.
    pub fn new(config: ConduitConfig) -> Result<Self> {
        config.validate()?;
        let supervisor = Arc::new(ProcessSupervisor::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&supervisor),
            config.timeouts.grace(),
        ));
        Ok(Self {
            config: Arc::new(config),
            supervisor,
            registry,
        })
    }

    /// The session registry, for lookup and listing.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Start a streaming exchange bound to the session resolved from
    /// `session_input` (empty input starts a fresh session).
    ///
    /// The request's prompt is written to the process's stdin and the stdin
    /// pipe is closed; the returned [`StreamingSession`] yields events until
    /// the terminal outcome.
    ///
    /// # Errors
    ///
    /// Validation, executable-resolution, and spawn failures surface before
    /// any event is produced.
    pub async fn stream(
        &self,
        request: &Request,
        session_input: &str,
    ) -> Result<StreamingSession> {
        validate_request(request)?;
        let session = self.registry.resolve_or_create(session_input).await;
        let span = info_span!("stream", session_id = %session.id);

        async {
            let spec = LaunchSpec::build(&self.config, request, &session.id)?;
            let handle = self.supervisor.start(spec).await?;

            // Once the process is up, every failure tears it down before
            // the error reaches the caller.
            let setup: Result<()> = async {
                self.registry.bind_handle(&session.id, handle.clone()).await?;
                let prompt = render_conversation(request);
                self.supervisor.write(&handle, prompt.as_bytes()).await?;
                self.supervisor.write(&handle, b"\n").await?;
                Ok(())
            }
            .await;
            if let Err(err) = setup {
                self.supervisor
                    .stop(&handle, self.config.timeouts.grace())
                    .await;
                return Err(err);
            }
            self.supervisor.close_stdin(&handle).await;

            info!(handle_id = %handle.id(), "exchange started");
            Ok(StreamingSession::start(
                Arc::clone(&self.supervisor),
                handle,
                self.config.timeouts.grace(),
                self.config.timeouts.startup_deadline(),
            ))
        }
        .instrument(span)
        .await
    }

    /// Run one exchange to completion and return the assembled message.
    ///
    /// Applies the configured stream deadline, when one is set; on expiry
    /// the exchange is cancelled (process torn down) before the timeout is
    /// surfaced.
    ///
    /// # Errors
    ///
    /// All transport-fatal, validation, cancellation, and timeout errors of
    /// the underlying exchange.
    pub async fn send(&self, request: &Request, session_input: &str) -> Result<StreamMessage> {
        let mut session = self.stream(request, session_input).await?;

        match self.config.timeouts.stream_deadline() {
            None => settle_exchange(&mut session).await,
            Some(deadline) => {
                match tokio::time::timeout(deadline, settle_exchange(&mut session)).await {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        // Teardown runs to completion here; the caller never
                        // sees the timeout while the process is still up.
                        session.cancel().await;
                        Err(ConduitError::Timeout(format!(
                            "exchange exceeded {deadline:?}"
                        )))
                    }
                }
            }
        }
    }

    /// Execute a command batch under its declared concurrency policy.
    ///
    /// The configured `max_parallel` caps the batch's own parallelism
    /// bound, whatever the list asks for.
    ///
    /// # Errors
    ///
    /// Setup errors (empty batch, invalid command) and
    /// pre-admission cancellation; individual command failures are entries
    /// in the report, not errors.
    pub async fn execute_batch(
        &self,
        list: &CommandList,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        let executor: Arc<dyn CommandExecutor> = Arc::new(TransportExecutor {
            config: Arc::clone(&self.config),
            supervisor: Arc::clone(&self.supervisor),
            registry: Arc::clone(&self.registry),
        });
        CommandScheduler::new(executor)
            .with_parallelism_ceiling(self.config.max_parallel)
            .execute(list, cancel)
            .await
    }

    /// Close a session, tearing down any bound process synchronously.
    pub async fn close_session(&self, session_input: &str) {
        self.registry.close(session_input).await;
    }

    /// List live sessions.
    pub async fn list_sessions(&self) -> Vec<Session> {
        self.registry.list().await
    }

    /// Shut the client down: close all sessions, then stop any process the
    /// registry no longer references.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.supervisor.shutdown(self.config.timeouts.grace()).await;
        info!("client shut down");
    }

}

/// Consume the event sequence to its end, then fetch the terminal outcome.
async fn drain_and_wait(session: &mut StreamingSession) -> StreamOutcome {
    while session.next_event().await.is_some() {}
    session.wait().await
}

/// Drive one exchange to its terminal outcome and map it to a result.
async fn settle_exchange(session: &mut StreamingSession) -> Result<StreamMessage> {
    match drain_and_wait(session).await {
        StreamOutcome::Completed(message) => Ok(message),
        StreamOutcome::Cancelled => Err(ConduitError::Cancelled("exchange cancelled".into())),
        StreamOutcome::Failed(err) => Err(err),
    }
}

fn validate_request(request: &Request) -> Result<()> {
    if request.messages.is_empty() {
        return Err(ConduitError::Validation(
            "request must contain at least one message".into(),
            None,
        ));
    }
    if request.latest_user_content().is_none() {
        return Err(ConduitError::Validation(
            "request must contain a user message".into(),
            None,
        ));
    }
    Ok(())
}

/// Render the conversation history as the prompt text fed to the CLI.
fn render_conversation(request: &Request) -> String {
    if let [only] = request.messages.as_slice() {
        return only.content.clone();
    }
    let mut prompt = String::new();
    for message in &request.messages {
        let tag = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(tag);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt
}

// ── Batch executor over the transport ────────────────────────────────────────

/// Production [`CommandExecutor`]: one fresh session and process per
/// command, so parallel commands never share a handle.
struct TransportExecutor {
    config: Arc<ConduitConfig>,
    supervisor: Arc<ProcessSupervisor>,
    registry: Arc<SessionRegistry>,
}

#[async_trait]
impl CommandExecutor for TransportExecutor {
    async fn execute(&self, command: &Command, cancel: &CancellationToken) -> Result<String> {
        let request = Request::from_prompt(command.render_prompt());
        let session = self.registry.resolve_or_create("").await;

        let spec = LaunchSpec::build(&self.config, &request, &session.id)?;
        let handle = self.supervisor.start(spec).await?;
        if let Err(err) = self.registry.bind_handle(&session.id, handle.clone()).await {
            // An unbound handle is invisible to `close`; stop it directly.
            self.supervisor
                .stop(&handle, self.config.timeouts.grace())
                .await;
            self.registry.close(&session.id).await;
            return Err(err);
        }

        let result = async {
            self.supervisor
                .write(&handle, request.latest_user_content().unwrap_or_default().as_bytes())
                .await?;
            self.supervisor.write(&handle, b"\n").await?;
            self.supervisor.close_stdin(&handle).await;

            let mut stream = StreamingSession::start(
                Arc::clone(&self.supervisor),
                handle.clone(),
                self.config.timeouts.grace(),
                self.config.timeouts.startup_deadline(),
            );

            let outcome = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    stream.cancel().await;
                    return Err(ConduitError::Cancelled("batch command cancelled".into()));
                }

                outcome = drain_and_wait(&mut stream) => outcome,
            };

            match outcome {
                StreamOutcome::Completed(message) => Ok(message.text()),
                StreamOutcome::Cancelled => {
                    Err(ConduitError::Cancelled("batch command cancelled".into()))
                }
                StreamOutcome::Failed(err) => Err(err),
            }
        }
        .await;

        // One-shot sessions do not outlive their command.
        self.registry.close(&session.id).await;
        result
    }
}
