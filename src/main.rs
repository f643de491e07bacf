#![forbid(unsafe_code)]

//! `skill-relay`: one-shot command-line driver for a conversation session.
//!
//! Loads configuration, sends a single prompt (optionally scoped to a skill)
//! to the agent CLI, waits for the exchange to finish, and prints the
//! assistant's replies. Ctrl-C or `SIGTERM` cancels the in-flight exchange.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use skill_relay::models::message::Role;
use skill_relay::{AppError, ConversationSession, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "skill-relay", about = "Drive a local coding-agent CLI", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Directory the agent runs in; overrides the configured workspace.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Skill id to invoke with the prompt.
    #[arg(long)]
    skill: Option<String>,

    /// List skills matching the prompt text instead of sending it.
    #[arg(long)]
    list_skills: bool,

    /// Print the whole transcript as JSON.
    #[arg(long)]
    json: bool,

    /// Prompt text.
    prompt: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    if let Some(ws) = &args.workspace {
        config.set_workspace_root(ws)?;
    }

    let catalog = config.catalog();
    let prompt = args.prompt.join(" ");

    if args.list_skills {
        for skill in catalog.filter(&prompt) {
            println!(
                "{:<24} {:<24} {}",
                skill.selector(),
                skill.display_name(),
                skill.description
            );
        }
        return Ok(());
    }

    let cwd = std::env::current_dir()
        .map_err(|err| AppError::Config(format!("cannot determine working directory: {err}")))?;

    // ── Run one exchange ────────────────────────────────
    let session = ConversationSession::start(config.session_config(&cwd), catalog);
    session.send(&prompt, args.skill.as_deref()).await?;
    info!(session_id = session.session_id(), "prompt sent");

    let snapshot = tokio::select! {
        snapshot = session.wait_idle() => snapshot,
        () = shutdown_signal() => {
            info!("shutdown signal received, cancelling exchange");
            session.cancel().await;
            session.wait_idle().await
        }
    };

    // ── Report ──────────────────────────────────────────
    if args.json {
        let rendered = serde_json::to_string_pretty(&snapshot.transcript)
            .map_err(|err| AppError::Io(format!("failed to render transcript: {err}")))?;
        println!("{rendered}");
    } else {
        for message in snapshot
            .transcript
            .iter()
            .filter(|m| m.role == Role::Assistant)
        {
            println!("{}\n", message.content.trim_end());
        }
    }

    match snapshot.last_error {
        Some(err) => {
            error!(%err, "exchange failed");
            Err(err)
        }
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
