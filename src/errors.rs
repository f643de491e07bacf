//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering every driver failure mode.
///
/// Errors are `Clone` so the session can keep the most recent one in its
/// observable snapshot while also returning it to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// No candidate path for the agent executable exists.
    DependencyMissing(String),
    /// The OS refused to start the agent process.
    Spawn(String),
    /// The agent ran and exited with a non-success status.
    NonZeroExit {
        /// Exit code, or `None` when the process was terminated by a signal.
        code: Option<i32>,
        /// Everything the agent wrote to stdout and stderr during the cycle.
        output: String,
    },
    /// The agent reported an error event on its stream.
    Protocol(String),
    /// Reading from or writing to the agent's stdio failed.
    Stream(String),
    /// A send was issued while another exchange is still in flight.
    Busy(String),
    /// The requested skill is not in the catalog.
    UnknownSkill(String),
    /// The caller supplied unusable input.
    InvalidInput(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::DependencyMissing(msg) => write!(f, "dependency missing: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::NonZeroExit { code, output } => {
                match code {
                    Some(c) => write!(f, "agent exited with code {c}")?,
                    None => write!(f, "agent terminated by signal")?,
                }
                if output.is_empty() {
                    Ok(())
                } else {
                    write!(f, ": {output}")
                }
            }
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::UnknownSkill(msg) => write!(f, "unknown skill: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
