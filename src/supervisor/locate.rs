//! Agent executable resolution.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{AppError, Result};

/// Default install locations probed for the agent CLI, in order.
pub const DEFAULT_CANDIDATES: &[&str] = &[
    "/opt/homebrew/bin/claude",
    "/usr/local/bin/claude",
    "/opt/homebrew/bin/claude-cli",
];

/// Return the first candidate that exists as a file.
///
/// # Errors
///
/// Returns [`AppError::DependencyMissing`] when no candidate exists. Nothing
/// is spawned in that case.
pub fn locate_executable<P: AsRef<Path>>(candidates: &[P]) -> Result<PathBuf> {
    for candidate in candidates {
        let path = candidate.as_ref();
        if path.is_file() {
            info!(path = %path.display(), "agent executable found");
            return Ok(path.to_path_buf());
        }
        debug!(path = %path.display(), "agent executable candidate missing");
    }

    let tried = candidates
        .iter()
        .map(|c| c.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(AppError::DependencyMissing(format!(
        "agent executable not found (tried: {tried})"
    )))
}
