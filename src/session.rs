//! Conversation session.
//!
//! A session drives one conversation with the agent CLI. All mutable state
//! (the transcript, the active process, per-cycle line assemblers) lives in a
//! single actor task. Callers talk to it through a cloneable
//! [`ConversationSession`] handle:
//!
//! - commands (`send`, `cancel`) go in over an [`mpsc`] channel;
//! - supervised processes report raw output and their exit over a second
//!   [`mpsc`] channel, in read order;
//! - the actor publishes a [`SessionSnapshot`] through a [`watch`] channel
//!   after every visible change.
//!
//! Reader tasks never touch the transcript, so there is exactly one writer.
//!
//! # Overlapping sends
//!
//! At most one agent process runs per session. A `send` issued while an
//! exchange is in flight is rejected with [`AppError::Busy`]; the caller can
//! `cancel` and retry once the session is idle.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::models::message::Message;
use crate::skills::SkillCatalog;
use crate::stream::codec::{LineAssembler, DEFAULT_MAX_LINE_BYTES};
use crate::stream::decoder::decode_line;
use crate::stream::{ExitOutcome, OutputStream, ProcessEvent};
use crate::supervisor::{AgentLauncher, AgentProcess, LaunchConfig, LaunchRequest};
use crate::transcript::{Applied, Transcript};
use crate::{AppError, Result};

/// Capacity of the process-event channel between readers and the actor.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the command channel between handles and the actor.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

// ── Configuration ────────────────────────────────────────────────────────────

/// Settings for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Token correlating every exchange of this conversation.
    pub session_id: String,
    /// Directory the agent runs in.
    pub working_dir: PathBuf,
    /// Agent CLI settings.
    pub launch: LaunchConfig,
    /// Longest accepted output line.
    pub max_line_bytes: usize,
}

impl SessionConfig {
    /// Settings with a freshly generated session id.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, launch: LaunchConfig) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            working_dir: working_dir.into(),
            launch,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Use a caller-chosen session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Override the output line limit.
    #[must_use]
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }
}

// ── Observable state ─────────────────────────────────────────────────────────

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Conversation correlation token.
    pub session_id: String,
    /// Messages, oldest first.
    pub transcript: Vec<Message>,
    /// Whether an agent process is in flight.
    pub is_processing: bool,
    /// Most recent failure or agent-reported error, cleared by the next send.
    pub last_error: Option<AppError>,
    /// Capability the agent is currently invoking.
    pub activity: Option<String>,
}

impl SessionSnapshot {
    fn idle(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            transcript: Vec::new(),
            is_processing: false,
            last_error: None,
            activity: None,
        }
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

enum Command {
    Send {
        text: String,
        skill_id: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running conversation.
///
/// The actor stops, cancelling any in-flight process, once every handle has
/// been dropped.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    session_id: Arc<str>,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl ConversationSession {
    /// Start the session actor. Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: SessionConfig, catalog: SkillCatalog) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::idle(&config.session_id));
        let session_id: Arc<str> = Arc::from(config.session_id.as_str());

        info!(
            session_id = %session_id,
            working_dir = %config.working_dir.display(),
            skills = catalog.len(),
            "conversation session started"
        );

        let actor = SessionActor {
            launcher: AgentLauncher::new(config.launch.clone()),
            config,
            catalog,
            transcript: Transcript::new(),
            active: None,
            next_cycle: 0,
            conversation_started: false,
            last_error: None,
            event_tx,
            snapshot_tx,
        };
        tokio::spawn(actor.run(command_rx, event_rx));

        Self {
            session_id,
            commands: command_tx,
            snapshots: snapshot_rx,
        }
    }

    /// Conversation correlation token.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send `text`, optionally scoped to a skill, to the agent.
    ///
    /// Returns once the agent process has been launched; the exchange itself
    /// continues in the background and is observed through snapshots.
    ///
    /// # Errors
    ///
    /// - [`AppError::Busy`] if an exchange is already in flight.
    /// - [`AppError::InvalidInput`] if there is neither text nor a skill.
    /// - [`AppError::UnknownSkill`] if `skill_id` is not in the catalog.
    /// - [`AppError::DependencyMissing`] if no agent executable exists.
    /// - [`AppError::Spawn`] if the process cannot be started.
    /// - [`AppError::Stream`] if the session actor has stopped.
    pub async fn send(&self, text: &str, skill_id: Option<&str>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send {
                text: text.to_owned(),
                skill_id: skill_id.map(str::to_owned),
                reply,
            })
            .await
            .map_err(|_| session_closed())?;
        response.await.map_err(|_| session_closed())?
    }

    /// Request termination of the in-flight exchange, if any.
    ///
    /// Safe to call at any point of the lifecycle and idempotent. Output
    /// already applied to the transcript is kept.
    pub async fn cancel(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Cancel { reply }).await.is_ok() {
            // The actor may have stopped; either way nothing is running.
            let _ = response.await;
        }
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified after every visible state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Whether an agent process is in flight.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.snapshots.borrow().is_processing
    }

    /// Wait until no exchange is in flight and return that state.
    pub async fn wait_idle(&self) -> SessionSnapshot {
        let mut rx = self.snapshots.clone();
        if let Ok(snapshot) = rx.wait_for(|snapshot| !snapshot.is_processing).await {
            return snapshot.clone();
        }
        // The actor stopped; its last published state is final.
        let snapshot = rx.borrow().clone();
        snapshot
    }
}

fn session_closed() -> AppError {
    AppError::Stream("conversation session has stopped".into())
}

// ── Actor ────────────────────────────────────────────────────────────────────

/// Per-cycle state of the in-flight process.
struct ActiveCycle {
    process: AgentProcess,
    stdout: LineAssembler,
    stderr: LineAssembler,
    /// Tail of the raw output of both pipes, kept as diagnostic text.
    captured: Vec<u8>,
    /// Number of trailing output bytes kept in `captured`.
    capture_limit: usize,
    /// Lines that decoded to an event of any kind.
    decoded: usize,
    /// Whether this cycle added an assistant message.
    answered: bool,
}

impl ActiveCycle {
    fn new(process: AgentProcess, max_line_bytes: usize) -> Self {
        Self {
            process,
            stdout: LineAssembler::with_max_line_bytes(max_line_bytes),
            stderr: LineAssembler::with_max_line_bytes(max_line_bytes),
            captured: Vec::new(),
            capture_limit: max_line_bytes,
            decoded: 0,
            answered: false,
        }
    }

    fn assembler(&mut self, stream: OutputStream) -> &mut LineAssembler {
        match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        }
    }

    /// Keep the last `capture_limit` bytes of output. Trimming happens in
    /// batches so a long stream is not shifted on every chunk.
    fn capture(&mut self, chunk: &[u8]) {
        self.captured.extend_from_slice(chunk);
        if self.captured.len() > self.capture_limit.saturating_mul(2) {
            let excess = self.captured.len() - self.capture_limit;
            self.captured.drain(..excess);
        }
    }

    fn captured_text(&self) -> String {
        let start = self.captured.len().saturating_sub(self.capture_limit);
        String::from_utf8_lossy(&self.captured[start..])
            .trim()
            .to_owned()
    }
}

struct SessionActor {
    config: SessionConfig,
    launcher: AgentLauncher,
    catalog: SkillCatalog,
    transcript: Transcript,
    active: Option<ActiveCycle>,
    next_cycle: u64,
    /// Set once an exchange completed, so later launches resume it.
    conversation_started: bool,
    last_error: Option<AppError>,
    event_tx: mpsc::Sender<ProcessEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<ProcessEvent>,
    ) {
        loop {
            tokio::select! {
                biased;

                Some(event) = events.recv() => self.on_process_event(event),

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }

        if let Some(active) = &self.active {
            active.process.cancel();
        }
        debug!(session_id = self.config.session_id.as_str(), "conversation session stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send {
                text,
                skill_id,
                reply,
            } => {
                let result = self.start_cycle(&text, skill_id.as_deref());
                // The caller may have stopped waiting; the exchange still runs.
                let _ = reply.send(result);
            }
            Command::Cancel { reply } => {
                match &self.active {
                    Some(active) => {
                        info!(
                            session_id = self.config.session_id.as_str(),
                            cycle = active.process.cycle(),
                            "cancelling exchange"
                        );
                        active.process.cancel();
                    }
                    None => debug!(
                        session_id = self.config.session_id.as_str(),
                        "cancel with no exchange in flight"
                    ),
                }
                let _ = reply.send(());
            }
        }
    }

    fn start_cycle(&mut self, text: &str, skill_id: Option<&str>) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(AppError::Busy(format!(
                "exchange {} is still in progress",
                active.process.cycle()
            )));
        }

        let prompt = self.catalog.compose_prompt(text, skill_id)?;

        self.next_cycle += 1;
        let cycle = self.next_cycle;
        let span = info_span!("send", session_id = self.config.session_id.as_str(), cycle);
        let _guard = span.enter();

        let launched = self.launcher.resolve().and_then(|executable| {
            self.launcher.launch(
                &executable,
                LaunchRequest {
                    cycle,
                    session_id: &self.config.session_id,
                    resume: self.conversation_started,
                    working_dir: &self.config.working_dir,
                    prompt: prompt.clone(),
                },
                self.event_tx.clone(),
            )
        });

        let process = match launched {
            Ok(process) => process,
            Err(err) => {
                warn!(error = %err, "exchange could not start");
                self.last_error = Some(err.clone());
                self.publish();
                return Err(err);
            }
        };

        self.transcript.begin_cycle();
        self.transcript.push_user(prompt);
        self.last_error = None;
        self.active = Some(ActiveCycle::new(process, self.config.max_line_bytes));
        self.publish();
        Ok(())
    }

    fn on_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output {
                cycle,
                stream,
                chunk,
            } => {
                let Some(active) = self.active_for(cycle) else {
                    debug!(cycle, "dropping output from a finished exchange");
                    return;
                };
                active.capture(&chunk);
                let lines = active.assembler(stream).feed(&chunk);
                if self.apply_lines(lines) {
                    self.publish();
                }
            }
            ProcessEvent::Exited { cycle, outcome } => self.finish_cycle(cycle, outcome),
        }
    }

    fn active_for(&mut self, cycle: u64) -> Option<&mut ActiveCycle> {
        self.active
            .as_mut()
            .filter(|active| active.process.cycle() == cycle)
    }

    /// Decode and apply `lines` in order. Returns whether anything visible changed.
    fn apply_lines(&mut self, lines: Vec<String>) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        let mut changed = false;
        for line in lines {
            let Some(event) = decode_line(&line) else {
                continue;
            };
            active.decoded += 1;

            match self.transcript.apply(event) {
                Applied::Appended => {
                    active.answered = true;
                    changed = true;
                }
                Applied::Merged | Applied::ActivityChanged => changed = true,
                Applied::Diagnostic(message) => {
                    warn!(
                        session_id = self.config.session_id.as_str(),
                        message = message.as_str(),
                        "agent reported an error"
                    );
                    self.last_error = Some(AppError::Protocol(message));
                    changed = true;
                }
                Applied::Duplicate | Applied::Ignored => {}
            }
        }
        changed
    }

    fn finish_cycle(&mut self, cycle: u64, outcome: ExitOutcome) {
        if self.active_for(cycle).is_none() {
            debug!(cycle, "ignoring exit of a finished exchange");
            return;
        }

        // Streams may legitimately end without a trailing newline.
        let mut tail = Vec::new();
        if let Some(active) = self.active.as_mut() {
            tail.extend(active.stdout.finish());
            tail.extend(active.stderr.finish());
        }
        self.apply_lines(tail);

        let Some(active) = self.active.take() else {
            return;
        };

        let session_id = self.config.session_id.as_str();
        if active.process.is_cancelled() {
            info!(session_id, cycle, "exchange cancelled");
        } else {
            match outcome {
                ExitOutcome::Exited { code: Some(0) } => {
                    self.conversation_started = true;
                    if active.decoded == 0 && !active.answered {
                        // Plain-text agent output: show it as the answer.
                        let text = active.captured_text();
                        if !text.is_empty() {
                            self.transcript.push_assistant(text);
                        }
                    }
                    info!(session_id, cycle, "exchange completed");
                }
                ExitOutcome::Exited { code } => {
                    warn!(session_id, cycle, ?code, "agent exited unsuccessfully");
                    self.last_error = Some(AppError::NonZeroExit {
                        code,
                        output: active.captured_text(),
                    });
                }
                ExitOutcome::Cancelled => info!(session_id, cycle, "exchange cancelled"),
                ExitOutcome::PromptWriteFailed(err) => {
                    self.last_error =
                        Some(AppError::Stream(format!("failed to write prompt: {err}")));
                }
                ExitOutcome::WaitFailed(err) => {
                    self.last_error = Some(AppError::Stream(format!(
                        "failed to wait for agent: {err}"
                    )));
                }
            }
        }

        self.transcript.end_cycle();
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(SessionSnapshot {
            session_id: self.config.session_id.clone(),
            transcript: self.transcript.messages().to_vec(),
            is_processing: self.active.is_some(),
            last_error: self.last_error.clone(),
            activity: self.transcript.activity().map(str::to_owned),
        });
    }
}
