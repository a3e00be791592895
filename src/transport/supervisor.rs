//! Process supervisor: spawn, feed, signal, and reap agent processes.
//!
//! The supervisor exclusively owns process lifecycle. Other components hold
//! a cheap [`ProcessHandle`] clone for write/signal operations, but only the
//! supervisor transitions [`ProcessState`] or releases resources. The
//! critical invariant is that [`ProcessSupervisor::stop`] never leaks a
//! process or a pipe, even when called repeatedly, concurrently, or after
//! the reader side was abandoned mid-stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::codec::NdjsonCodec;
use crate::transport::launch::LaunchSpec;
use crate::{ConduitError, Result};

/// Lazy line sequence over a child's stdout. Not restartable: a new handle
/// must be started to read again.
pub type LineStream = FramedRead<ChildStdout, NdjsonCodec>;

/// Maximum stderr bytes attached to fatal-error reports.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

// ── Lifecycle state ──────────────────────────────────────────────────────────

/// Observable lifecycle state of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawn issued, pipes not yet attached.
    Starting,
    /// Process live, pipes attached.
    Running,
    /// Stop in progress; no new writes accepted.
    Draining,
    /// Process reaped and resources released.
    Terminated,
}

impl ProcessState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Draining => 2,
            Self::Terminated => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Shared internals behind one process handle.
#[derive(Debug)]
struct HandleShared {
    state: AtomicU8,
    pid: AtomicU32,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<ChildStdout>>,
    /// Exit code once the child has been reaped; inner `None` means the
    /// process was terminated by a signal.
    exit_code: Mutex<Option<Option<i32>>>,
    stderr: Mutex<String>,
    /// Drain task over the child's stderr pipe; joined once the child has
    /// been reaped so the capture buffer is complete before anyone reads it.
    stderr_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Reference to one supervised external process.
///
/// Clones share the same underlying process. Holding a handle grants
/// write/signal access only; lifecycle control stays with the supervisor.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    id: Uuid,
    spec: Arc<LaunchSpec>,
    shared: Arc<HandleShared>,
}

impl ProcessHandle {
    /// Unique handle identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Launch parameters the process was started with.
    #[must_use]
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// OS process id, when known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        let raw = self.shared.pid.load(Ordering::Acquire);
        (raw != 0).then_some(raw)
    }

    /// Token cancelled when the handle enters teardown.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    fn set_state(&self, state: ProcessState) {
        self.shared.state.store(state.as_u8(), Ordering::Release);
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

/// Instance-owned supervisor over a set of live agent processes.
///
/// Each client owns its own supervisor; there is no process-wide registry.
/// The active-handle map is the only shared mutable state, guarded by a
/// reader/writer lock.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    active: RwLock<HashMap<Uuid, ProcessHandle>>,
}

impl ProcessSupervisor {
    /// Create an empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently supervised processes.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Spawn an agent process from a launch spec and register its handle.
    ///
    /// The child inherits the parent environment plus the spec's additions,
    /// runs in the spec's working directory, and has all three stdio pipes
    /// attached. Stderr is drained in full by a side task so the child can
    /// never block on a full stderr pipe.
    ///
    /// # Errors
    ///
    /// - [`ConduitError::Spawn`] — the OS refused the spawn.
    ///
    /// Executable resolution happens when the spec is built; a handle is
    /// only ever created for a resolvable program.
    pub async fn start(&self, spec: LaunchSpec) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => {
                    ConduitError::NotFound(spec.program.display().to_string())
                }
                _ => ConduitError::Spawn(err.to_string()),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConduitError::Spawn("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConduitError::Spawn("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConduitError::Spawn("failed to capture stderr".into()))?;

        let pid = child.id().unwrap_or(0);
        let handle = ProcessHandle {
            id: Uuid::new_v4(),
            spec: Arc::new(spec),
            shared: Arc::new(HandleShared {
                state: AtomicU8::new(ProcessState::Starting.as_u8()),
                pid: AtomicU32::new(pid),
                child: Mutex::new(Some(child)),
                stdin: Mutex::new(Some(stdin)),
                stdout: Mutex::new(Some(stdout)),
                exit_code: Mutex::new(None),
                stderr: Mutex::new(String::new()),
                stderr_task: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        };

        let drain = spawn_stderr_drain(handle.clone(), stderr);
        *handle.shared.stderr_task.lock().await = Some(drain);

        handle.set_state(ProcessState::Running);
        self.active.write().await.insert(handle.id, handle.clone());

        info!(handle_id = %handle.id, pid, program = %handle.spec.program.display(), "agent process started");
        Ok(handle)
    }

    /// Write raw bytes to the process's stdin and flush.
    ///
    /// Single-writer discipline: callers must not invoke this concurrently
    /// against the same handle.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::ClosedPipe`] when the process is draining,
    /// terminated, or its stdin has been released.
    pub async fn write(&self, handle: &ProcessHandle, bytes: &[u8]) -> Result<()> {
        if !matches!(handle.state(), ProcessState::Running) {
            return Err(ConduitError::ClosedPipe(format!(
                "process {} is not running",
                handle.id
            )));
        }

        let mut guard = handle.shared.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| ConduitError::ClosedPipe(format!("stdin of {} released", handle.id)))?;

        stdin
            .write_all(bytes)
            .await
            .map_err(|e| ConduitError::ClosedPipe(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| ConduitError::ClosedPipe(e.to_string()))?;
        Ok(())
    }

    /// Close the process's stdin, signalling end of input.
    ///
    /// Idempotent; releasing an already-released pipe is a no-op.
    pub async fn close_stdin(&self, handle: &ProcessHandle) {
        handle.shared.stdin.lock().await.take();
    }

    /// Take the lazy stdout line sequence for this handle.
    ///
    /// The sequence is infinite until the output stream closes and is not
    /// restartable; exactly one reader task per handle may consume it.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Transport`] when the stream was already
    /// taken or the process is gone.
    pub async fn read_lines(&self, handle: &ProcessHandle) -> Result<LineStream> {
        let stdout = handle.shared.stdout.lock().await.take().ok_or_else(|| {
            ConduitError::Transport(format!("stdout of {} already consumed", handle.id))
        })?;
        Ok(FramedRead::new(stdout, NdjsonCodec::new()))
    }

    /// Send a cooperative interrupt to the process, best-effort.
    ///
    /// On unix this delivers `SIGINT`; elsewhere it is a logged no-op and
    /// cancellation degrades to grace-then-kill.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::NotRunning`] when the process is not in the
    /// `Running` state.
    pub fn signal_interrupt(&self, handle: &ProcessHandle) -> Result<()> {
        if !matches!(handle.state(), ProcessState::Running) {
            return Err(ConduitError::NotRunning(format!(
                "process {} is not running",
                handle.id
            )));
        }

        #[cfg(unix)]
        if let Some(pid) = handle.pid() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            #[allow(clippy::cast_possible_wrap)]
            let target = Pid::from_raw(pid as i32);
            if let Err(err) = kill(target, Signal::SIGINT) {
                debug!(handle_id = %handle.id, %err, "SIGINT delivery failed");
            }
        }

        #[cfg(not(unix))]
        debug!(handle_id = %handle.id, "cooperative interrupt unsupported on this platform");

        Ok(())
    }

    /// Wait up to `grace` for the process to exit on its own.
    ///
    /// Returns the exit code (`None` when terminated by a signal) or
    /// [`ConduitError::Timeout`] when the process is still alive after the
    /// grace period. A process that was already reaped returns its recorded
    /// exit code.
    ///
    /// # Errors
    ///
    /// [`ConduitError::Timeout`] on grace expiry; [`ConduitError::Io`] when
    /// the wait itself fails.
    pub async fn wait_exit(&self, handle: &ProcessHandle, grace: Duration) -> Result<Option<i32>> {
        let recorded = { *handle.shared.exit_code.lock().await };
        if let Some(code) = recorded {
            join_stderr_drain(handle).await;
            return Ok(code);
        }

        let mut guard = handle.shared.child.lock().await;
        let Some(child) = guard.as_mut() else {
            // Reaped between the check above and acquiring the lock.
            let recorded = { *handle.shared.exit_code.lock().await };
            drop(guard);
            join_stderr_drain(handle).await;
            return Ok(recorded.unwrap_or(None));
        };

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                let code = status.code();
                *handle.shared.exit_code.lock().await = Some(code);
                guard.take();
                drop(guard);
                // The dead child's pipe is at EOF; the drain finishes on
                // its own and the tail is complete once we return.
                join_stderr_drain(handle).await;
                Ok(code)
            }
            Ok(Err(err)) => Err(ConduitError::Io(err.to_string())),
            Err(_elapsed) => Err(ConduitError::Timeout(format!(
                "process {} still running after {grace:?}",
                handle.id
            ))),
        }
    }

    /// Terminate the process and release every attached resource.
    ///
    /// Idempotent and safe to call concurrently with in-flight reads: the
    /// first caller transitions the handle to `Draining`, waits up to
    /// `grace` for a natural exit, force-kills on expiry, closes all pipes,
    /// and deregisters the handle. Later or concurrent callers observe the
    /// state transition and return once the handle is `Terminated`.
    pub async fn stop(&self, handle: &ProcessHandle, grace: Duration) {
        if matches!(
            handle.state(),
            ProcessState::Draining | ProcessState::Terminated
        ) {
            // Another stop is in flight or finished; converge on Terminated
            // by waiting for the child slot to clear.
            let guard = handle.shared.child.lock().await;
            drop(guard);
            join_stderr_drain(handle).await;
            handle.set_state(ProcessState::Terminated);
            return;
        }

        handle.set_state(ProcessState::Draining);
        handle.shared.cancel.cancel();

        // Close stdin first so a well-behaved process sees EOF and exits.
        handle.shared.stdin.lock().await.take();

        let mut guard = handle.shared.child.lock().await;
        if let Some(child) = guard.as_mut() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(handle_id = %handle.id, ?status, "process exited within grace period");
                    *handle.shared.exit_code.lock().await = Some(status.code());
                }
                Ok(Err(err)) => {
                    warn!(handle_id = %handle.id, %err, "error waiting for process");
                }
                Err(_elapsed) => {
                    warn!(handle_id = %handle.id, "grace period expired, force-killing");
                    if let Err(err) = child.kill().await {
                        warn!(handle_id = %handle.id, %err, "force-kill failed");
                    }
                    *handle.shared.exit_code.lock().await = Some(None);
                }
            }
            guard.take();
        }
        drop(guard);

        join_stderr_drain(handle).await;

        // Release the read side if the reader never claimed it.
        handle.shared.stdout.lock().await.take();

        handle.set_state(ProcessState::Terminated);
        self.active.write().await.remove(&handle.id);
        info!(handle_id = %handle.id, "process stopped and deregistered");
    }

    /// Tail of the captured stderr, bounded to the last 8 KiB.
    ///
    /// The capture is complete once [`Self::wait_exit`] or [`Self::stop`]
    /// has returned for a reaped process; before that the drain may still
    /// be mid-flush.
    pub async fn stderr_tail(&self, handle: &ProcessHandle) -> String {
        let buf = handle.shared.stderr.lock().await;
        let mut start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
        // Snap to a character boundary.
        while start < buf.len() && !buf.is_char_boundary(start) {
            start += 1;
        }
        buf[start..].to_owned()
    }

    /// Stop every supervised process. Used at client shutdown.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<ProcessHandle> = self.active.read().await.values().cloned().collect();
        for handle in handles {
            self.stop(&handle, grace).await;
        }
    }
}

/// Drain the child's stderr into the handle's capture buffer.
///
/// Runs until EOF; a dead reader must never cause the child to block on a
/// full stderr pipe.
fn spawn_stderr_drain(
    handle: ProcessHandle,
    mut stderr: tokio::process::ChildStderr,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut chunk = [0_u8; 4096];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    handle.shared.stderr.lock().await.push_str(&text);
                }
                Err(err) => {
                    debug!(handle_id = %handle.id, %err, "stderr drain ended on error");
                    break;
                }
            }
        }
    })
}

/// Wait for the stderr drain to hit EOF. Only meaningful once the child has
/// been reaped or killed; before that the drain blocks on a live pipe.
async fn join_stderr_drain(handle: &ProcessHandle) {
    let task = handle.shared.stderr_task.lock().await.take();
    if let Some(task) = task {
        task.await.ok();
    }
}
