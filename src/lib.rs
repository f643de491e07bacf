#![forbid(unsafe_code)]

//! Drive a local coding-agent CLI and rebuild its conversation transcript.
//!
//! [`ConversationSession`] launches the agent for each exchange, writes the
//! prompt to its stdin, and turns the newline-delimited JSON it streams back
//! into an ordered list of [`Message`](models::message::Message)s that
//! callers observe through snapshots.

pub mod config;
pub mod errors;
pub mod models;
pub mod session;
pub mod skills;
pub mod stream;
pub mod supervisor;
pub mod transcript;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use session::{ConversationSession, SessionConfig, SessionSnapshot};
