//! Integration tests for the process supervisor and output readers.
//!
//! Verifies event ordering (every output chunk before the single exit
//! report), exit codes, cancellation, and spawn failures without going
//! through a session.

#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use skill_relay::stream::reader::run_reader;
use skill_relay::stream::{ExitOutcome, OutputStream, ProcessEvent};
use skill_relay::supervisor::{AgentLauncher, LaunchRequest};
use skill_relay::AppError;

use super::test_helpers::{launch_config, write_script, EXCHANGE_TIMEOUT};

fn request<'a>(cycle: u64, working_dir: &'a Path, prompt: &str) -> LaunchRequest<'a> {
    LaunchRequest {
        cycle,
        session_id: "sup-session",
        resume: false,
        working_dir,
        prompt: prompt.to_owned(),
    }
}

/// Collect every event until the channel closes.
async fn drain(mut rx: mpsc::Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(EXCHANGE_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
    })
    .await
    .expect("events must end in time");
    events
}

fn stdout_text(events: &[ProcessEvent]) -> String {
    let mut bytes = Vec::new();
    for event in events {
        if let ProcessEvent::Output {
            stream: OutputStream::Stdout,
            chunk,
            ..
        } = event
        {
            bytes.extend_from_slice(chunk);
        }
    }
    String::from_utf8(bytes).expect("utf-8 output")
}

// ── Arguments ───────────────────────────────────────────────────────────────

/// The session flag names a new conversation; the resume flag continues it.
#[test]
fn arguments_select_session_or_resume_flag() {
    let launcher = AgentLauncher::new(launch_config(Path::new("/tmp/agent.sh")));

    assert_eq!(
        launcher.arguments("abc", false),
        vec!["/tmp/agent.sh", "-p", "--session-id", "abc"]
    );
    assert_eq!(
        launcher.arguments("abc", true),
        vec!["/tmp/agent.sh", "-p", "--resume", "abc"]
    );
}

// ── Exit reporting ──────────────────────────────────────────────────────────

/// Output arrives in order and exactly one exit report comes last.
#[tokio::test]
async fn exit_is_reported_once_after_all_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        temp.path(),
        "agent.sh",
        "cat\necho err-line >&2\nprintf 'a\\nb\\n'\nexit 0",
    );
    let launcher = AgentLauncher::new(launch_config(&script));
    let executable = launcher.resolve().expect("resolve");
    let (tx, rx) = mpsc::channel(64);

    let process = launcher
        .launch(&executable, request(7, temp.path(), "echoed\n"), tx)
        .expect("launch");
    assert_eq!(process.cycle(), 7);
    assert!(process.pid().is_some());

    let events = drain(rx).await;

    let exits: Vec<_> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, ProcessEvent::Exited { .. }))
        .collect();
    assert_eq!(exits.len(), 1, "exactly one exit report");
    assert_eq!(exits[0].0, events.len() - 1, "exit report must come last");

    match events.last() {
        Some(ProcessEvent::Exited { cycle, outcome }) => {
            assert_eq!(*cycle, 7);
            assert_eq!(*outcome, ExitOutcome::Exited { code: Some(0) });
            assert!(outcome.is_success());
        }
        other => panic!("expected exit report, got {other:?}"),
    }

    assert_eq!(stdout_text(&events), "echoed\na\nb\n");
    assert!(events.iter().any(|e| matches!(
        e,
        ProcessEvent::Output { stream: OutputStream::Stderr, cycle: 7, .. }
    )));
    assert!(!process.is_cancelled());
}

/// A non-zero exit code is reported as-is.
#[tokio::test]
async fn non_zero_exit_code_is_reported() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_script(temp.path(), "agent.sh", "cat >/dev/null\nexit 5");
    let launcher = AgentLauncher::new(launch_config(&script));
    let executable = launcher.resolve().expect("resolve");
    let (tx, rx) = mpsc::channel(64);

    let _process = launcher
        .launch(&executable, request(1, temp.path(), "x"), tx)
        .expect("launch");
    let events = drain(rx).await;

    match events.last() {
        Some(ProcessEvent::Exited { outcome, .. }) => {
            assert_eq!(*outcome, ExitOutcome::Exited { code: Some(5) });
            assert!(!outcome.is_success());
        }
        other => panic!("expected exit report, got {other:?}"),
    }
}

/// An agent that never reads stdin still reports its own exit status.
#[tokio::test]
async fn unread_prompt_does_not_mask_exit_status() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_script(temp.path(), "agent.sh", "printf 'ok\\n'\nexit 0");
    let launcher = AgentLauncher::new(launch_config(&script));
    let executable = launcher.resolve().expect("resolve");
    let (tx, rx) = mpsc::channel(64);

    let prompt = "x".repeat(1024 * 1024);
    let _process = launcher
        .launch(&executable, request(4, temp.path(), &prompt), tx)
        .expect("launch");
    let events = drain(rx).await;

    match events.last() {
        Some(ProcessEvent::Exited { outcome, .. }) => {
            assert_eq!(*outcome, ExitOutcome::Exited { code: Some(0) });
        }
        other => panic!("expected exit report, got {other:?}"),
    }
    assert_eq!(stdout_text(&events), "ok\n");
}

/// A background process holding the pipes open does not delay the exit report
/// past the drain limit.
#[tokio::test]
async fn background_descendant_does_not_block_exit_report() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        temp.path(),
        "agent.sh",
        "cat >/dev/null\nsleep 60 &\nprintf 'done\\n'\nexit 0",
    );
    let launcher = AgentLauncher::new(launch_config(&script));
    let executable = launcher.resolve().expect("resolve");
    let (tx, rx) = mpsc::channel(64);

    let started = Instant::now();
    let _process = launcher
        .launch(&executable, request(5, temp.path(), "x"), tx)
        .expect("launch");
    let events = drain(rx).await;

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "exit report must not wait for the background process"
    );
    assert_eq!(stdout_text(&events), "done\n", "output before exit is kept");
    match events.last() {
        Some(ProcessEvent::Exited { outcome, .. }) => {
            assert_eq!(*outcome, ExitOutcome::Exited { code: Some(0) });
        }
        other => panic!("expected exit report, got {other:?}"),
    }
}

// ── Cancellation ────────────────────────────────────────────────────────────

/// Cancelling a running process reports `Cancelled` within the grace period.
#[tokio::test]
async fn cancel_reports_cancelled() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_script(temp.path(), "agent.sh", "cat >/dev/null\nexec sleep 30");
    let launcher = AgentLauncher::new(launch_config(&script));
    let executable = launcher.resolve().expect("resolve");
    let (tx, rx) = mpsc::channel(64);

    let process = launcher
        .launch(&executable, request(2, temp.path(), "x"), tx)
        .expect("launch");
    tokio::time::sleep(Duration::from_millis(200)).await;

    process.cancel();
    process.cancel();
    assert!(process.is_cancelled());

    let events = drain(rx).await;
    match events.last() {
        Some(ProcessEvent::Exited { outcome, .. }) => {
            assert_eq!(*outcome, ExitOutcome::Cancelled);
        }
        other => panic!("expected exit report, got {other:?}"),
    }
}

/// An agent that ignores `SIGTERM` is killed after the grace period.
#[tokio::test]
async fn cancel_kills_agent_ignoring_sigterm() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        temp.path(),
        "agent.sh",
        "trap '' TERM\ncat >/dev/null\nwhile :; do sleep 1; done >/dev/null 2>&1",
    );
    let launcher = AgentLauncher::new(launch_config(&script));
    let executable = launcher.resolve().expect("resolve");
    let (tx, rx) = mpsc::channel(64);

    let process = launcher
        .launch(&executable, request(3, temp.path(), "x"), tx)
        .expect("launch");
    tokio::time::sleep(Duration::from_millis(200)).await;
    process.cancel();

    let events = drain(rx).await;
    assert!(matches!(
        events.last(),
        Some(ProcessEvent::Exited {
            outcome: ExitOutcome::Cancelled,
            ..
        })
    ));
}

/// Cancelling while output is still draining after exit ends the drain.
#[tokio::test]
async fn cancel_ends_output_drain() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        temp.path(),
        "agent.sh",
        "cat >/dev/null\nsleep 60 &\nexit 0",
    );
    let mut config = launch_config(&script);
    config.output_drain = Duration::from_secs(60);
    let launcher = AgentLauncher::new(config);
    let executable = launcher.resolve().expect("resolve");
    let (tx, rx) = mpsc::channel(64);

    let process = launcher
        .launch(&executable, request(6, temp.path(), "x"), tx)
        .expect("launch");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let started = Instant::now();
    process.cancel();
    let events = drain(rx).await;

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "cancel must end the drain promptly"
    );
    assert!(matches!(events.last(), Some(ProcessEvent::Exited { .. })));
}

/// Cancellation terminates every process in the agent's group.
#[tokio::test]
async fn cancel_terminates_background_descendants() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = write_script(
        temp.path(),
        "agent.sh",
        "cat >/dev/null\nsleep 60 &\nexec sleep 30",
    );
    let mut config = launch_config(&script);
    config.output_drain = Duration::from_secs(60);
    let launcher = AgentLauncher::new(config);
    let executable = launcher.resolve().expect("resolve");
    let (tx, rx) = mpsc::channel(64);

    let process = launcher
        .launch(&executable, request(8, temp.path(), "x"), tx)
        .expect("launch");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    process.cancel();
    let events = drain(rx).await;

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "pipes must close once the group is terminated"
    );
    assert!(matches!(
        events.last(),
        Some(ProcessEvent::Exited {
            outcome: ExitOutcome::Cancelled,
            ..
        })
    ));
}

// ── Spawn failures ──────────────────────────────────────────────────────────

/// A path that cannot be executed fails the launch and sends nothing.
#[tokio::test]
async fn unspawnable_executable_is_spawn_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let launcher = AgentLauncher::new(launch_config(&temp.path().join("agent.sh")));
    let (tx, mut rx) = mpsc::channel(8);

    let err = launcher
        .launch(&temp.path().join("missing"), request(1, temp.path(), "x"), tx)
        .expect_err("launch must fail");

    assert!(matches!(err, AppError::Spawn(_)), "got {err:?}");
    assert!(rx.recv().await.is_none(), "no event for a failed launch");
}

// ── Reader ──────────────────────────────────────────────────────────────────

/// The reader forwards every byte tagged with its cycle and stream.
#[tokio::test]
async fn reader_forwards_all_bytes() {
    let source: &[u8] = b"{\"type\":\"result\"}\npartial";
    let (tx, mut rx) = mpsc::channel(8);

    let forwarded = run_reader(9, OutputStream::Stderr, source, tx).await;
    assert_eq!(forwarded, source.len());

    let mut received = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            ProcessEvent::Output {
                cycle: 9,
                stream: OutputStream::Stderr,
                chunk,
            } => received.extend_from_slice(&chunk),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(received, source);
}

/// The reader stops quietly when the receiver is gone.
#[tokio::test]
async fn reader_stops_when_receiver_dropped() {
    let source: &[u8] = b"data\n";
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    let forwarded = run_reader(1, OutputStream::Stdout, source, tx).await;
    assert_eq!(forwarded, source.len(), "the chunk was read before the send failed");
}
