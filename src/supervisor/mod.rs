//! Agent process supervision.
//!
//! - `locate`: probes an ordered list of install paths for the agent CLI.
//! - `spawner`: launches the agent for one send cycle, writes the prompt,
//!   forwards output, reports exit exactly once, and handles cancellation.

pub mod locate;
pub mod spawner;

pub use locate::{locate_executable, DEFAULT_CANDIDATES};
pub use spawner::{AgentLauncher, AgentProcess, LaunchConfig, LaunchRequest};
