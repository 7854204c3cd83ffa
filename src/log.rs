// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Per-run log.
//!
//! Every invocation of macprefs keeps a __run log__: an append-only list of
//! timestamped, leveled messages. The run log is written to its own file under
//! the log directory, optionally echoed to the terminal in color, and kept in
//! memory so the final summary can count warnings and errors.
//!
//! The run log is the record a user reads after the fact. Diagnostics meant
//! for debugging macprefs itself go through `tracing` instead, and every run
//! log entry is mirrored there at debug level.

use chrono::{DateTime, Local};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{create_dir_all, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Severity of a run log entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Process,
}

impl Display for LogLevel {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Process => "PROCESS",
        })
    }
}

/// Single line of the run log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl Display for LogEntry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "[{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Append-only log of a single run.
#[derive(Debug)]
pub struct RunLog {
    path: Option<PathBuf>,
    file: Option<File>,
    echo: bool,
    entries: Vec<LogEntry>,
    bar: ProgressBar,
}

impl RunLog {
    /// Create new run log file `<name>_<timestamp>.log` in `dir`.
    ///
    /// Creates `dir` if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`LogError::Create`] if the directory or file cannot be
    ///   created.
    pub fn create(dir: impl AsRef<Path>, name: &str, echo: bool) -> Result<Self> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(|err| LogError::Create {
            path: dir.into(),
            source: err,
        })?;

        let path = dir.join(format!("{name}_{}.log", Local::now().format("%Y%m%d_%H%M%S")));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| LogError::Create {
                path: path.clone(),
                source: err,
            })?;

        Ok(Self {
            path: Some(path),
            file: Some(file),
            echo,
            entries: Vec::new(),
            bar: ProgressBar::hidden(),
        })
    }

    /// Construct run log that is only kept in memory.
    pub fn in_memory(echo: bool) -> Self {
        Self {
            path: None,
            file: None,
            echo,
            entries: Vec::new(),
            bar: ProgressBar::hidden(),
        }
    }

    /// Path to run log file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Count entries of a given level.
    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|entry| entry.level == level).count()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn process(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Process, message);
    }

    /// Record entry in memory, append it to the log file, and echo it.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        };
        debug!("{entry}");

        if let Some(file) = self.file.as_mut() {
            if let Err(err) = writeln!(file, "{entry}") {
                warn!("cannot append to run log: {err}");
            }
        }

        if self.echo {
            let line = colorize(&entry);
            self.bar.suspend(|| println!("{line}"));
        }

        self.entries.push(entry);
    }

    /// Start progress bar of `len` steps.
    ///
    /// Log lines echoed while the bar is active are printed above it. The bar
    /// stays hidden when the log is not echoed.
    pub fn start_progress(&mut self, len: u64, message: impl Into<String>) -> ProgressBar {
        let bar = if self.echo {
            ProgressBar::new(len)
        } else {
            ProgressBar::hidden()
        };

        if let Ok(style) = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}] {pos}/{len}",
        ) {
            bar.set_style(style.progress_chars("-Cco."));
        }
        bar.set_message(message.into());
        self.bar = bar.clone();

        bar
    }

    /// Clear progress bar started by [`RunLog::start_progress`].
    pub fn finish_progress(&mut self) {
        self.bar.finish_and_clear();
        self.bar = ProgressBar::hidden();
    }
}

fn colorize(entry: &LogEntry) -> String {
    let tag = format!("[{}]", entry.level);
    let tag = match entry.level {
        LogLevel::Info => tag.blue(),
        LogLevel::Success => tag.green(),
        LogLevel::Warning => tag.yellow(),
        LogLevel::Error => tag.red().bold(),
        LogLevel::Process => tag.cyan(),
    };

    format!("{tag} {}", entry.message)
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to create run log at {:?}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = LogError> = std::result::Result<T, E>;
