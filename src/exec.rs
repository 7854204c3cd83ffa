// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Everything macprefs does to the system goes through an external utility,
//! e.g., `defaults`, `killall`, `launchctl`. Arguments are always passed as
//! argv entries. Nothing here ever hands a string to a shell.

use std::{
    ffi::OsStr,
    path::PathBuf,
    process::{Command, Stdio},
    time::Duration,
};
use tracing::{debug, instrument};

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run command to completion and capture its output, whatever the exit status.
///
/// # Errors
///
/// - Return [`ExecError::Spawn`] if the command cannot be started.
#[instrument(skip(cmd, args), level = "debug")]
pub fn syscall_capture(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<CommandOutput> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| ExecError::Spawn {
            command: cmd.as_ref().to_string_lossy().into_owned(),
            source: err,
        })?;

    let captured = CommandOutput {
        success: output.status.success(),
        stdout: chomp(String::from_utf8_lossy(output.stdout.as_slice()).into_owned()),
        stderr: chomp(String::from_utf8_lossy(output.stderr.as_slice()).into_owned()),
    };
    debug!("{:?} exited with success={}", cmd.as_ref(), captured.success);

    Ok(captured)
}

/// Run command to completion, and treat non-zero exit status as an error.
///
/// Returns standard output of the command.
///
/// # Errors
///
/// - Return [`ExecError::Spawn`] if the command cannot be started.
/// - Return [`ExecError::Failed`] if the command exits unsuccessfully.
pub fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let output = syscall_capture(cmd.as_ref(), args)?;
    if !output.success {
        return Err(ExecError::Failed {
            command: cmd.as_ref().to_string_lossy().into_owned(),
            message: output.stderr,
        });
    }

    Ok(output.stdout)
}

/// Run command, killing it if it does not finish within `limit`.
///
/// # Errors
///
/// - Return [`ExecError::Spawn`] if the command cannot be started.
/// - Return [`ExecError::Timeout`] if the command runs past `limit`.
/// - Return [`ExecError::Failed`] if the command exits unsuccessfully.
#[instrument(skip(cmd, args), level = "debug")]
pub async fn syscall_with_timeout(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    limit: Duration,
) -> Result<String> {
    let command = cmd.as_ref().to_string_lossy().into_owned();
    let child = tokio::process::Command::new(cmd.as_ref())
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| ExecError::Spawn {
            command: command.clone(),
            source: err,
        })?;

    // INVARIANT: Dropping the wait future on expiry kills the child.
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.map_err(|err| ExecError::Spawn {
            command: command.clone(),
            source: err,
        })?,
        Err(_) => return Err(ExecError::Timeout { command, limit }),
    };

    let stdout = chomp(String::from_utf8_lossy(output.stdout.as_slice()).into_owned());
    if !output.status.success() {
        return Err(ExecError::Failed {
            command,
            message: chomp(String::from_utf8_lossy(output.stderr.as_slice()).into_owned()),
        });
    }

    Ok(stdout)
}

/// Locate required binary on `PATH`.
///
/// # Errors
///
/// - Return [`ExecError::MissingBinary`] if the binary cannot be found.
pub fn require_binary(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| ExecError::MissingBinary(name.to_string()))
}

/// Check if current effective user is root.
///
/// # Errors
///
/// - Return [`ExecError`] if `id` cannot be run.
pub fn is_root() -> Result<bool> {
    Ok(syscall_non_interactive("id", ["-u"])? == "0")
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to run {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command {command:?} failed: {message}")]
    Failed { command: String, message: String },

    #[error("command {command:?} did not finish within {limit:?}")]
    Timeout { command: String, limit: Duration },

    #[error("required binary {0:?} not found on PATH")]
    MissingBinary(String),
}

/// Friendly result alias :3
type Result<T, E = ExecError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn capture_stdout_and_chomp() -> anyhow::Result<()> {
        let output = syscall_capture("echo", ["hello"])?;
        assert_eq!(
            output,
            CommandOutput {
                success: true,
                stdout: "hello".into(),
                stderr: String::new(),
            }
        );

        Ok(())
    }

    #[test]
    fn non_zero_exit_is_error() {
        let result = syscall_non_interactive("false", Vec::<&str>::new());
        assert!(matches!(result, Err(ExecError::Failed { .. })));
    }

    #[test]
    fn missing_binary_is_reported() {
        let result = require_binary("macprefs-no-such-binary");
        assert!(matches!(result, Err(ExecError::MissingBinary(name)) if name == "macprefs-no-such-binary"));
    }

    #[tokio::test]
    async fn timeout_kills_slow_command() {
        let result = syscall_with_timeout("sleep", ["5"], Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn fast_command_beats_timeout() -> anyhow::Result<()> {
        let output = syscall_with_timeout("echo", ["done"], Duration::from_secs(5)).await?;
        assert_eq!(output, "done");

        Ok(())
    }
}
