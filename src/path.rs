// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations for the files macprefs writes: run logs,
//! backup directories, and LaunchAgent definitions. None of these functions
//! check that the returned path actually exists.

use std::path::PathBuf;

/// Determine absolute path to user's home directory.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default directory for per-run log files.
///
/// Uses `~/Library/Logs/macprefs`, the place Console.app looks for user logs.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_log_dir() -> Result<PathBuf> {
    home_dir().map(|home| home.join("Library").join("Logs").join("macprefs"))
}

/// Determine default root directory for timestamped backups.
///
/// Uses the platform data directory, e.g.,
/// `~/Library/Application Support/macprefs/backups` on macOS or
/// `$XDG_DATA_HOME/macprefs/backups` elsewhere.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_backup_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("macprefs").join("backups"))
        .ok_or(NoWayHome)
}

/// Determine directory holding per-user LaunchAgent definitions.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn launch_agents_dir() -> Result<PathBuf> {
    home_dir().map(|home| home.join("Library").join("LaunchAgents"))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("HOME", "/Users/blah")])]
    fn home_relative_defaults() -> anyhow::Result<()> {
        assert_eq!(
            default_log_dir()?,
            PathBuf::from("/Users/blah/Library/Logs/macprefs")
        );
        assert_eq!(
            launch_agents_dir()?,
            PathBuf::from("/Users/blah/Library/LaunchAgents")
        );
        assert!(default_backup_dir()?.ends_with("macprefs/backups"));

        Ok(())
    }
}
