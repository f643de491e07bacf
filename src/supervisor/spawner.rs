//! Agent process spawner and supervisor task.
//!
//! Launches the agent CLI for one send cycle with:
//! - `kill_on_drop(true)` so a dropped supervisor never leaks a process.
//! - stdin, stdout and stderr piped; the prompt is written to stdin once and
//!   stdin is then closed so the agent sees end of input.
//! - one reader task per output pipe forwarding raw chunks in read order.
//! - on unix, its own process group, so termination reaches every process
//!   the agent started.
//!
//! A single supervisor task owns the child. It reports exactly one
//! [`ProcessEvent::Exited`] per launch, whether the agent finished, failed,
//! could not receive its prompt, or was cancelled. The report follows the
//! drained pipes, or the drain limit when a leftover descendant keeps a pipe
//! open; the stragglers are then killed and the readers aborted.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stream::reader::run_reader;
use crate::stream::{ExitOutcome, OutputStream, ProcessEvent};
use crate::supervisor::locate::locate_executable;
use crate::{AppError, Result};

// ── Configuration ────────────────────────────────────────────────────────────

/// How to find and invoke the agent CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Executable paths probed in order; the first existing one is used.
    pub candidates: Vec<PathBuf>,
    /// Fixed flags requesting non-interactive, streamed, verbose output.
    pub args: Vec<String>,
    /// Flag that names the conversation on its first exchange.
    pub session_flag: String,
    /// Flag that continues an existing conversation.
    pub resume_flag: String,
    /// Time allowed between `SIGTERM` and a hard kill on cancellation.
    pub cancel_grace: Duration,
    /// Time allowed for the output pipes to close once the agent has exited.
    pub output_drain: Duration,
}

/// Parameters for one launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    /// Send cycle the process belongs to; tags every emitted event.
    pub cycle: u64,
    /// Conversation correlation token.
    pub session_id: &'a str,
    /// Whether the agent should continue an earlier exchange.
    pub resume: bool,
    /// Directory the agent runs in.
    pub working_dir: &'a Path,
    /// Text written to the agent's stdin.
    pub prompt: String,
}

// ── Launcher ─────────────────────────────────────────────────────────────────

/// Resolves and launches the agent CLI.
#[derive(Debug, Clone)]
pub struct AgentLauncher {
    config: LaunchConfig,
}

impl AgentLauncher {
    /// Create a launcher from its configuration.
    #[must_use]
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    /// The launcher's configuration.
    #[must_use]
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Resolve the agent executable from the configured candidates.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::DependencyMissing`] when no candidate exists.
    pub fn resolve(&self) -> Result<PathBuf> {
        locate_executable(&self.config.candidates)
    }

    /// Full argument list for a launch.
    #[must_use]
    pub fn arguments(&self, session_id: &str, resume: bool) -> Vec<String> {
        let flag = if resume {
            &self.config.resume_flag
        } else {
            &self.config.session_flag
        };
        let mut args = self.config.args.clone();
        args.push(flag.clone());
        args.push(session_id.to_owned());
        args
    }

    /// Spawn `executable` for `request` and start supervising it.
    ///
    /// Output chunks and the final exit report are delivered through
    /// `event_tx`. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the OS cannot start the process or its
    /// pipes cannot be captured. No event is sent in that case.
    pub fn launch(
        &self,
        executable: &Path,
        request: LaunchRequest<'_>,
        event_tx: mpsc::Sender<ProcessEvent>,
    ) -> Result<AgentProcess> {
        let args = self.arguments(request.session_id, request.resume);
        debug!(
            executable = %executable.display(),
            ?args,
            cycle = request.cycle,
            "launching agent"
        );

        let mut command = Command::new(executable);
        command
            .args(&args)
            .current_dir(request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn agent: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

        let pid = child.id();
        info!(
            session_id = request.session_id,
            cycle = request.cycle,
            pid = pid.unwrap_or(0),
            resume = request.resume,
            "agent process spawned"
        );

        let cycle = request.cycle;
        let cancel = CancellationToken::new();
        let grace = self.config.cancel_grace;
        let drain = self.config.output_drain;

        let stdout_task = tokio::spawn(run_reader(
            cycle,
            OutputStream::Stdout,
            stdout,
            event_tx.clone(),
        ));
        let stderr_task = tokio::spawn(run_reader(
            cycle,
            OutputStream::Stderr,
            stderr,
            event_tx.clone(),
        ));

        let task = tokio::spawn(supervise(
            Supervised {
                cycle,
                child,
                pid,
                stdin,
                prompt: request.prompt,
                readers: vec![stdout_task, stderr_task],
                grace,
                drain,
            },
            event_tx,
            cancel.clone(),
        ));

        Ok(AgentProcess {
            cycle,
            pid,
            cancel,
            task,
        })
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// Handle to a supervised agent process.
///
/// Dropping the handle does not stop the process; call
/// [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct AgentProcess {
    cycle: u64,
    pid: Option<u32>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AgentProcess {
    /// Send cycle this process serves.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// OS process id, if it was available at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request termination. Idempotent and safe after the process exited.
    ///
    /// Termination is best-effort: `SIGTERM` first, a hard kill after the
    /// grace period. The exit report still arrives as
    /// [`ExitOutcome::Cancelled`].
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(cycle = self.cycle, "agent process cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the supervisor task has finished (the exit report was sent).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ── Supervisor task ──────────────────────────────────────────────────────────

struct Supervised {
    cycle: u64,
    child: Child,
    /// Child pid, which is also its process group id on unix.
    pid: Option<u32>,
    stdin: ChildStdin,
    prompt: String,
    readers: Vec<JoinHandle<usize>>,
    grace: Duration,
    drain: Duration,
}

async fn supervise(
    process: Supervised,
    event_tx: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
) {
    let Supervised {
        cycle,
        mut child,
        pid,
        stdin,
        prompt,
        mut readers,
        grace,
        drain,
    } = process;

    let write_result = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = write_prompt(stdin, &prompt) => Some(result),
    };

    let outcome = match write_result {
        None => {
            terminate(&mut child, pid, grace).await;
            ExitOutcome::Cancelled
        }
        Some(Err(err)) if err.kind() == ErrorKind::BrokenPipe => {
            // The agent closed stdin early; its exit status decides the run.
            debug!(cycle, "agent closed stdin before reading the whole prompt");
            wait_for_exit(cycle, &mut child, pid, &cancel, grace).await
        }
        Some(Err(err)) => {
            warn!(cycle, error = %err, "failed to deliver prompt to agent");
            terminate(&mut child, pid, grace).await;
            ExitOutcome::PromptWriteFailed(err.to_string())
        }
        Some(Ok(())) => wait_for_exit(cycle, &mut child, pid, &cancel, grace).await,
    };

    drain_readers(cycle, &mut readers, pid, &cancel, drain).await;

    info!(cycle, ?outcome, "agent process finished");

    if event_tx
        .send(ProcessEvent::Exited { cycle, outcome })
        .await
        .is_err()
    {
        debug!(cycle, "event channel closed before exit could be delivered");
    }
}

/// Write the prompt once, then close stdin to signal end of input.
async fn write_prompt(mut stdin: ChildStdin, prompt: &str) -> std::io::Result<()> {
    stdin.write_all(prompt.as_bytes()).await?;
    stdin.flush().await?;
    stdin.shutdown().await?;
    drop(stdin);
    Ok(())
}

async fn wait_for_exit(
    cycle: u64,
    child: &mut Child,
    pid: Option<u32>,
    cancel: &CancellationToken,
    grace: Duration,
) -> ExitOutcome {
    let status = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        status = child.wait() => Some(status),
    };

    match status {
        None => {
            terminate(child, pid, grace).await;
            ExitOutcome::Cancelled
        }
        Some(Ok(status)) => ExitOutcome::Exited {
            code: status.code(),
        },
        Some(Err(err)) => {
            warn!(cycle, %err, "error waiting for agent process");
            ExitOutcome::WaitFailed(err.to_string())
        }
    }
}

/// Wait for both readers to reach end of stream.
///
/// A descendant that outlives the agent keeps the pipes open, so the wait
/// is bounded by `limit` and ends early on cancellation. Readers still
/// running after that are aborted once the process group has been killed.
async fn drain_readers(
    cycle: u64,
    readers: &mut Vec<JoinHandle<usize>>,
    pid: Option<u32>,
    cancel: &CancellationToken,
    limit: Duration,
) {
    // Already cancelled means the group was terminated; only the limit applies.
    let watch_cancel = !cancel.is_cancelled();

    tokio::select! {
        biased;
        () = join_readers(cycle, readers) => return,
        () = cancel.cancelled(), if watch_cancel => {
            info!(cycle, "cancelled while draining agent output");
        }
        () = tokio::time::sleep(limit) => {
            warn!(cycle, ?limit, "agent output still open after exit, killing leftover processes");
        }
    }

    kill_group(pid);
    for reader in readers.drain(..) {
        reader.abort();
        if let Err(err) = reader.await {
            if !err.is_cancelled() {
                warn!(cycle, %err, "output reader task failed");
            }
        }
    }
}

/// Await readers in turn, removing each one once it has completed.
async fn join_readers(cycle: u64, readers: &mut Vec<JoinHandle<usize>>) {
    while let Some(reader) = readers.last_mut() {
        if let Err(err) = reader.await {
            warn!(cycle, %err, "output reader task failed");
        }
        readers.pop();
    }
}

/// Stop the agent: `SIGTERM` to its process group where available, then a
/// hard kill of the group and the child.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    #[cfg(unix)]
    {
        if signal_group(pid, nix::sys::signal::Signal::SIGTERM) {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(?status, "agent exited after SIGTERM");
                    return;
                }
                Ok(Err(err)) => debug!(%err, "wait after SIGTERM failed"),
                Err(_elapsed) => debug!(?grace, "agent ignored SIGTERM, killing"),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    kill_group(pid);
    if let Err(err) = child.kill().await {
        debug!(%err, "kill failed; agent likely already exited");
    }
}

/// `SIGKILL` every process left in the agent's group.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);

    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(err) => {
            debug!(pgid = raw, ?signal, %err, "signalling agent process group failed");
            false
        }
    }
}
