//! Configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::skill::Skill;
use crate::session::SessionConfig;
use crate::skills::SkillCatalog;
use crate::stream::codec::DEFAULT_MAX_LINE_BYTES;
use crate::supervisor::{LaunchConfig, DEFAULT_CANDIDATES};
use crate::{AppError, Result};

/// How the agent CLI is located and invoked.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentConfig {
    /// Executable paths probed in order.
    pub candidates: Vec<PathBuf>,
    /// Fixed flags passed on every launch.
    pub args: Vec<String>,
    /// Flag naming the conversation on its first exchange.
    pub session_flag: String,
    /// Flag continuing the conversation on later exchanges.
    pub resume_flag: String,
    /// Longest accepted output line; longer lines are discarded.
    pub max_line_bytes: usize,
    /// Milliseconds between `SIGTERM` and a hard kill on cancellation.
    pub cancel_grace_ms: u64,
    /// Milliseconds the output pipes may stay open after the agent exits.
    pub output_drain_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATES.iter().map(PathBuf::from).collect(),
            args: default_args(),
            session_flag: "--session-id".into(),
            resume_flag: "--resume".into(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            cancel_grace_ms: 3000,
            output_drain_ms: 2000,
        }
    }
}

fn default_args() -> Vec<String> {
    ["-p", "--output-format", "stream-json", "--verbose"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory the agent runs in; the caller's working directory if unset.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Agent CLI settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Skill records offered to the user.
    #[serde(default)]
    pub skills: Vec<Skill>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the workspace root, canonicalizing it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory does not exist.
    pub fn set_workspace_root(&mut self, root: impl AsRef<Path>) -> Result<()> {
        self.workspace_root = Some(canonical_dir(root.as_ref())?);
        Ok(())
    }

    /// Launcher settings derived from `[agent]`.
    #[must_use]
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            candidates: self.agent.candidates.clone(),
            args: self.agent.args.clone(),
            session_flag: self.agent.session_flag.clone(),
            resume_flag: self.agent.resume_flag.clone(),
            cancel_grace: Duration::from_millis(self.agent.cancel_grace_ms),
            output_drain: Duration::from_millis(self.agent.output_drain_ms),
        }
    }

    /// Session settings for a new conversation in the configured workspace,
    /// falling back to `fallback_dir` when no workspace is configured.
    #[must_use]
    pub fn session_config(&self, fallback_dir: &Path) -> SessionConfig {
        let working_dir = self
            .workspace_root
            .clone()
            .unwrap_or_else(|| fallback_dir.to_path_buf());
        SessionConfig::new(working_dir, self.launch_config())
            .with_max_line_bytes(self.agent.max_line_bytes)
    }

    /// Skill catalog built from `[[skills]]`.
    #[must_use]
    pub fn catalog(&self) -> SkillCatalog {
        SkillCatalog::new(self.skills.clone())
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.candidates.is_empty() {
            return Err(AppError::Config(
                "agent.candidates must not be empty".into(),
            ));
        }

        if self.agent.session_flag.trim().is_empty() || self.agent.resume_flag.trim().is_empty()
        {
            return Err(AppError::Config(
                "agent.session_flag and agent.resume_flag must not be empty".into(),
            ));
        }

        if self.agent.max_line_bytes == 0 {
            return Err(AppError::Config(
                "agent.max_line_bytes must be greater than zero".into(),
            ));
        }

        if let Some(skill) = self.skills.iter().find(|s| s.name.trim().is_empty()) {
            return Err(AppError::Config(format!(
                "skill name must not be empty (id: '{}')",
                skill.id
            )));
        }

        if let Some(root) = &self.workspace_root {
            self.workspace_root = Some(canonical_dir(root)?);
        }

        Ok(())
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    let canonical = path
        .canonicalize()
        .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
    if canonical.is_dir() {
        Ok(canonical)
    } else {
        Err(AppError::Config(format!(
            "workspace_root is not a directory: {}",
            canonical.display()
        )))
    }
}
