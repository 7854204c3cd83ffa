// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scheduled runs through launchd.
//!
//! A profile can be re-applied once a day by a per-user __LaunchAgent__. The
//! agent is a property list in `~/Library/LaunchAgents` that runs macprefs
//! with the same profile at a fixed time. Installing writes the property list
//! and loads it with `launchctl`. Uninstalling unloads and deletes it.
//!
//! LaunchAgents run as the logged-in user, so profiles that must be applied
//! as root cannot be scheduled this way.

use crate::{config::Profile, exec::syscall_non_interactive, log::RunLog, settings::RunMode};

use std::{
    ffi::OsString,
    fs::{create_dir_all, remove_file, write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument, warn};

/// Time of day a scheduled run fires.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self { hour: 9, minute: 0 }
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTime(data.into());
        let (hour, minute) = data.split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse::<u8>().map_err(|_| invalid())?;
        let minute = minute.parse::<u8>().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }

        Ok(Self { hour, minute })
    }
}

/// Per-user LaunchAgent running a single profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchAgent {
    pub label: String,
    pub program: PathBuf,

    /// Built-in profile name or absolute path to profile file.
    pub profile: String,
    pub at: TimeOfDay,

    /// Directory overrides handed on to every scheduled run.
    pub log_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,

    launchctl: PathBuf,
}

impl LaunchAgent {
    /// Construct agent labelled after profile `name` that runs `profile`.
    pub fn new(
        name: &str,
        profile: impl Into<String>,
        program: impl Into<PathBuf>,
        at: TimeOfDay,
    ) -> Self {
        Self {
            label: format!("io.macprefs.{}", label_safe(name)),
            program: program.into(),
            profile: profile.into(),
            at,
            log_dir: None,
            backup_dir: None,
            launchctl: PathBuf::from("launchctl"),
        }
    }

    /// Construct agent for `profile`, refusing profiles that need root.
    ///
    /// # Errors
    ///
    /// - Return [`ScheduleError::NeedsRoot`] if `profile` must be applied as
    ///   root.
    pub fn for_profile(
        profile: &Profile,
        target: impl Into<String>,
        program: impl Into<PathBuf>,
        at: TimeOfDay,
    ) -> Result<Self> {
        if profile.profile.require_root {
            return Err(ScheduleError::NeedsRoot(profile.name().into()));
        }

        Ok(Self::new(profile.name(), target, program, at))
    }

    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backup_dir = dir;
        self
    }

    /// Use a different `launchctl` binary.
    pub fn with_launchctl(mut self, program: impl Into<PathBuf>) -> Self {
        self.launchctl = program.into();
        self
    }

    /// Arguments a scheduled run is started with, program first.
    pub fn program_arguments(&self) -> Vec<String> {
        let mut args = vec![
            self.program.to_string_lossy().into_owned(),
            "--profile".into(),
            self.profile.clone(),
        ];
        if let Some(dir) = &self.log_dir {
            args.extend(["--log-dir".into(), dir.to_string_lossy().into_owned()]);
        }
        if let Some(dir) = &self.backup_dir {
            args.extend(["--backup-dir".into(), dir.to_string_lossy().into_owned()]);
        }
        args.push("--quiet".into());

        args
    }

    /// Location of property list inside `agents_dir`.
    pub fn plist_path(&self, agents_dir: &Path) -> PathBuf {
        agents_dir.join(format!("{}.plist", self.label))
    }

    /// Render LaunchAgent property list.
    pub fn to_plist(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
{arguments}    </array>
    <key>StartCalendarInterval</key>
    <dict>
        <key>Hour</key>
        <integer>{hour}</integer>
        <key>Minute</key>
        <integer>{minute}</integer>
    </dict>
    <key>RunAtLoad</key>
    <false/>
</dict>
</plist>
"#,
            label = xml_escape(&self.label),
            arguments = self
                .program_arguments()
                .iter()
                .map(|arg| format!("        <string>{}</string>\n", xml_escape(arg)))
                .collect::<String>(),
            hour = self.at.hour,
            minute = self.at.minute,
        )
    }

    /// Write property list and load it with `launchctl`.
    ///
    /// An agent already installed under the same label is unloaded first.
    /// If loading fails, the freshly written property list is removed again.
    ///
    /// # Errors
    ///
    /// - Return [`ScheduleError::Io`] if the property list cannot be written.
    /// - Return [`ScheduleError::Exec`] if `launchctl` fails.
    #[instrument(skip(self, log), level = "debug")]
    pub fn install(&self, agents_dir: &Path, mode: RunMode, log: &mut RunLog) -> Result<PathBuf> {
        let path = self.plist_path(agents_dir);
        log.process(format!(
            "installing {} to run daily at {:02}:{:02}",
            self.label, self.at.hour, self.at.minute
        ));

        if mode == RunMode::DryRun {
            log.info(format!("[dry run] would write {}", path.display()));
            log.info(format!("[dry run] would load {}", self.label));
            return Ok(path);
        }

        if path.is_file() {
            log.info(format!("replacing existing {}", self.label));
            let args: [OsString; 2] = ["unload".into(), path.as_os_str().into()];
            if let Err(err) = syscall_non_interactive(&self.launchctl, args) {
                debug!("{} was not loaded: {err}", self.label);
            }
        }

        create_dir_all(agents_dir).map_err(|err| ScheduleError::Io {
            path: agents_dir.into(),
            source: err,
        })?;
        write(&path, self.to_plist()).map_err(|err| ScheduleError::Io {
            path: path.clone(),
            source: err,
        })?;

        // INVARIANT: An installed property list is always a loaded one.
        let args: [OsString; 3] = ["load".into(), "-w".into(), path.as_os_str().into()];
        if let Err(err) = syscall_non_interactive(&self.launchctl, args) {
            log.error(format!("could not load {}: {err}", self.label));
            if let Err(cleanup) = remove_file(&path) {
                warn!("cannot remove {}: {cleanup}", path.display());
            }
            return Err(err.into());
        }
        log.success(format!("installed {}", path.display()));

        Ok(path)
    }

    /// Unload agent with `launchctl`, and delete its property list.
    ///
    /// A missing property list is only a warning.
    ///
    /// # Errors
    ///
    /// - Return [`ScheduleError::Io`] if the property list cannot be deleted.
    #[instrument(skip(self, log), level = "debug")]
    pub fn uninstall(&self, agents_dir: &Path, mode: RunMode, log: &mut RunLog) -> Result<()> {
        let path = self.plist_path(agents_dir);
        log.process(format!("uninstalling {}", self.label));

        if !path.is_file() {
            log.warning(format!("{} is not installed", path.display()));
            return Ok(());
        }

        if mode == RunMode::DryRun {
            log.info(format!("[dry run] would unload and remove {}", path.display()));
            return Ok(());
        }

        let args: [OsString; 3] = ["unload".into(), "-w".into(), path.as_os_str().into()];
        if let Err(err) = syscall_non_interactive(&self.launchctl, args) {
            log.warning(format!("could not unload {}: {err}", self.label));
        }

        remove_file(&path).map_err(|err| ScheduleError::Io {
            path: path.clone(),
            source: err,
        })?;
        log.success(format!("removed {}", path.display()));

        Ok(())
    }
}

fn label_safe(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' { ch } else { '-' })
        .collect()
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            ch => escaped.push(ch),
        }
    }

    escaped
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid time of day {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("failed to access {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("profile {0:?} must run as root and cannot be scheduled as a LaunchAgent")]
    NeedsRoot(String),

    #[error(transparent)]
    Exec(#[from] crate::exec::ExecError),
}

/// Friendly result alias :3
type Result<T, E = ScheduleError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test_case("09:00", Some((9, 0)); "morning")]
    #[test_case("23:59", Some((23, 59)); "last minute")]
    #[test_case("24:00", None; "hour out of range")]
    #[test_case("12:60", None; "minute out of range")]
    #[test_case("noon", None; "garbage")]
    #[test]
    fn parse_time_of_day(input: &str, expect: Option<(u8, u8)>) {
        let result = input.parse::<TimeOfDay>().ok().map(|at| (at.hour, at.minute));
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test]
    fn render_plist_escapes_text() {
        let agent = LaunchAgent::new(
            "my profile",
            "my profile",
            "/opt/a&b/macprefs",
            TimeOfDay { hour: 7, minute: 5 },
        );
        let plist = agent.to_plist();

        assert_eq!(agent.label, "io.macprefs.my-profile");
        assert!(plist.contains("<string>io.macprefs.my-profile</string>"));
        assert!(plist.contains("<string>/opt/a&amp;b/macprefs</string>"));
        assert!(plist.contains("<string>my profile</string>"));
        assert!(plist.contains("<integer>7</integer>"));
        assert!(plist.contains("<integer>5</integer>"));
    }

    #[sealed_test]
    fn dry_run_install_writes_nothing() -> anyhow::Result<()> {
        let agent = LaunchAgent::new("finder", "finder", "/usr/local/bin/macprefs", TimeOfDay::default());
        let mut log = RunLog::in_memory(false);

        let path = agent.install(Path::new("agents"), RunMode::DryRun, &mut log)?;

        assert_eq!(path, PathBuf::from("agents/io.macprefs.finder.plist"));
        assert!(!Path::new("agents").exists());

        Ok(())
    }

    #[test]
    fn render_plist_passes_dir_overrides() {
        let agent = LaunchAgent::new("finder", "finder", "/usr/local/bin/macprefs", TimeOfDay::default())
            .with_log_dir(Some(PathBuf::from("/tmp/logs")))
            .with_backup_dir(Some(PathBuf::from("/tmp/backups")));

        assert_eq!(
            agent.program_arguments(),
            vec![
                "/usr/local/bin/macprefs",
                "--profile",
                "finder",
                "--log-dir",
                "/tmp/logs",
                "--backup-dir",
                "/tmp/backups",
                "--quiet",
            ]
        );
        assert!(agent
            .to_plist()
            .contains("<string>--backup-dir</string>\n        <string>/tmp/backups</string>"));
    }

    #[test]
    fn root_profile_cannot_be_scheduled() -> anyhow::Result<()> {
        let profile = crate::profiles::resolve("firewall")?;
        let result = LaunchAgent::for_profile(&profile, "firewall", "/usr/local/bin/macprefs", TimeOfDay::default());

        assert!(matches!(result, Err(ScheduleError::NeedsRoot(name)) if name == "firewall"));

        Ok(())
    }

    #[sealed_test]
    fn failed_load_leaves_no_plist() {
        let agent = LaunchAgent::new("finder", "finder", "/usr/local/bin/macprefs", TimeOfDay::default())
            .with_launchctl("false");
        let mut log = RunLog::in_memory(false);

        let result = agent.install(Path::new("agents"), RunMode::Apply, &mut log);

        assert!(matches!(result, Err(ScheduleError::Exec(_))));
        assert!(!agent.plist_path(Path::new("agents")).exists());
        assert_eq!(log.count(crate::log::LogLevel::Error), 1);
    }

    #[sealed_test]
    fn reinstall_replaces_loaded_agent() -> anyhow::Result<()> {
        let agents = Path::new("agents");
        let mut log = RunLog::in_memory(false);
        LaunchAgent::new("finder", "finder", "/usr/local/bin/macprefs", TimeOfDay::default())
            .with_launchctl("true")
            .install(agents, RunMode::Apply, &mut log)?;

        let later = LaunchAgent::new("finder", "finder", "/usr/local/bin/macprefs", TimeOfDay { hour: 18, minute: 30 })
            .with_launchctl("true");
        let path = later.install(agents, RunMode::Apply, &mut log)?;

        assert_eq!(std::fs::read_to_string(path)?, later.to_plist());

        Ok(())
    }

    #[sealed_test]
    fn uninstall_missing_agent_is_warning() -> anyhow::Result<()> {
        let agent = LaunchAgent::new("finder", "finder", "/usr/local/bin/macprefs", TimeOfDay::default());
        let mut log = RunLog::in_memory(false);

        agent.uninstall(Path::new("agents"), RunMode::Apply, &mut log)?;

        assert_eq!(log.count(crate::log::LogLevel::Warning), 1);

        Ok(())
    }
}
