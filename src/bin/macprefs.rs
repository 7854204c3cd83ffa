// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use macprefs::{
    backup::{Backup, BackupStore},
    config::Profile,
    exec::{is_root, require_binary},
    log::{LogLevel, RunLog},
    path::{default_backup_dir, default_log_dir, launch_agents_dir},
    profiles,
    report::audit,
    run::{run_configure, run_restore, Outcome},
    schedule::{LaunchAgent, TimeOfDay},
    settings::RunMode,
    store::DefaultsStore,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use inquire::Confirm;
use std::{
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    long_about = "Back up, apply, verify, and restore macOS preference domains.\n\n\
        Without a mode flag, the selected profile is backed up, applied, and verified.",
    override_usage = "macprefs [options] [--configure | --report | --restore [dir] | --install | --uninstall]",
    version
)]
struct Cli {
    /// Built-in profile name or path to profile file.
    #[arg(short, long, value_name = "name|path", default_value = "security")]
    pub profile: String,

    /// Back up, apply, and verify profile (default).
    #[arg(long, group = "mode")]
    pub configure: bool,

    /// Restore given backup directory, or the latest backup of the profile's domain.
    #[arg(
        long,
        group = "mode",
        visible_alias = "rollback",
        value_name = "dir",
        num_args = 0..=1
    )]
    pub restore: Option<Option<PathBuf>>,

    /// Audit current settings against profile without changing anything.
    #[arg(long, group = "mode", visible_alias = "audit-only")]
    pub report: bool,

    /// Install LaunchAgent that applies profile daily.
    #[arg(long, group = "mode")]
    pub install: bool,

    /// Remove LaunchAgent of profile.
    #[arg(long, group = "mode")]
    pub uninstall: bool,

    /// List existing backups.
    #[arg(long, group = "mode")]
    pub list_backups: bool,

    /// List built-in profiles.
    #[arg(long, group = "mode")]
    pub list_profiles: bool,

    /// Log every change without making it.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip backup and verification.
    #[arg(long)]
    pub quick: bool,

    /// Time of day for scheduled runs.
    #[arg(long, value_name = "HH:MM", requires = "install")]
    pub at: Option<TimeOfDay>,

    /// Do not ask for confirmation before restoring.
    #[arg(short, long)]
    pub yes: bool,

    /// Do not echo log lines to the terminal.
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long)]
    pub no_color: bool,

    /// Directory for run logs.
    #[arg(long, value_name = "path")]
    pub log_dir: Option<PathBuf>,

    /// Directory holding backups.
    #[arg(long, value_name = "path")]
    pub backup_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Configure,
    Restore(Option<PathBuf>),
    Report,
    Install,
    Uninstall,
    ListBackups,
    ListProfiles,
}

impl Cli {
    fn mode(&self) -> Mode {
        if let Some(dir) = &self.restore {
            Mode::Restore(dir.clone())
        } else if self.report {
            Mode::Report
        } else if self.install {
            Mode::Install
        } else if self.uninstall {
            Mode::Uninstall
        } else if self.list_backups {
            Mode::ListBackups
        } else if self.list_profiles {
            Mode::ListProfiles
        } else {
            Mode::Configure
        }
    }

    fn run_mode(&self) -> RunMode {
        if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Apply
        }
    }

    async fn run(self) -> Result<Outcome> {
        if self.no_color {
            colored::control::set_override(false);
        }

        let mode = self.mode();
        if mode == Mode::ListProfiles {
            return run_list_profiles();
        }

        let profile = profiles::resolve(&self.profile)?;
        let backups = BackupStore::open(match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => match &profile.profile.backup_dir {
                Some(dir) => dir.clone(),
                None => default_backup_dir()?,
            },
        });

        if mode == Mode::ListBackups {
            return run_list_backups(&backups);
        }

        check_preconditions(&profile, &mode, self.run_mode())?;

        let log_dir = match &self.log_dir {
            Some(dir) => dir.clone(),
            None => match &profile.profile.log_dir {
                Some(dir) => dir.clone(),
                None => default_log_dir()?,
            },
        };
        let mut log = RunLog::create(&log_dir, profile.name(), !self.quiet)?;
        log.info(format!(
            "macprefs {} running profile {} on {}",
            env!("CARGO_PKG_VERSION"),
            profile.name(),
            profile.domain()
        ));
        if self.dry_run {
            log.info("dry run: no changes will be made");
        }

        let store = DefaultsStore::new();
        let mut taken = None;
        let outcome = match mode {
            Mode::Configure => {
                let run = run_configure(&store, &profile, &backups, self.run_mode(), self.quick, &mut log);
                taken = run.backup.clone();
                run.outcome()
            }
            Mode::Restore(dir) => {
                let yes = self.yes;
                run_restore(
                    &store,
                    &profile,
                    &backups,
                    dir,
                    self.run_mode(),
                    |question| {
                        if yes {
                            return Ok(true);
                        }
                        Confirm::new(question).with_default(false).prompt()
                    },
                    &mut log,
                )?
            }
            Mode::Report => {
                let report = audit(&store, &profile, &mut log).await;
                Outcome::from_failures(report.failures())
            }
            Mode::Install => {
                // INVARIANT: launchd starts scheduled runs from "/", so relative
                // overrides must be made absolute here.
                let log_dir = self.log_dir.as_deref().map(std::path::absolute).transpose()?;
                let backup_dir = self.backup_dir.as_deref().map(std::path::absolute).transpose()?;
                let agent = launch_agent(&self.profile, &profile, self.at.unwrap_or_default())?
                    .with_log_dir(log_dir)
                    .with_backup_dir(backup_dir);
                agent.install(&launch_agents_dir()?, self.run_mode(), &mut log)?;
                Outcome::Clean
            }
            Mode::Uninstall => {
                let agent = LaunchAgent::new(
                    profile.name(),
                    profile_target(&self.profile)?,
                    current_program()?,
                    TimeOfDay::default(),
                );
                agent.uninstall(&launch_agents_dir()?, self.run_mode(), &mut log)?;
                Outcome::Clean
            }
            Mode::ListBackups | Mode::ListProfiles => unreachable!("handled before logging starts"),
        };

        print_summary(&log, outcome, taken.as_ref());
        Ok(outcome)
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run().await {
        Ok(Outcome::Clean) => exit(0),
        Ok(Outcome::Failed) => exit(1),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

async fn run() -> Result<Outcome> {
    Cli::parse().run().await
}

fn check_preconditions(profile: &Profile, mode: &Mode, run_mode: RunMode) -> Result<()> {
    if std::env::consts::OS != "macos" {
        bail!(
            "macprefs only runs on macOS, this is {}",
            std::env::consts::OS
        );
    }

    let binaries: &[&str] = match mode {
        Mode::Install | Mode::Uninstall => &["launchctl"],
        Mode::Restore(_) => &["defaults", "killall"],
        _ => &["defaults"],
    };
    for binary in binaries {
        let found = require_binary(binary)?;
        debug!("found {binary} at {}", found.display());
    }

    let mutates = matches!(mode, Mode::Configure | Mode::Restore(_)) && run_mode == RunMode::Apply;
    if profile.profile.require_root && mutates && !is_root()? {
        bail!(
            "profile {} writes {} and must be run as root",
            profile.name(),
            profile.domain()
        );
    }

    Ok(())
}

fn current_program() -> Result<PathBuf> {
    std::env::current_exe().context("cannot locate macprefs executable")
}

// INVARIANT: Scheduled runs do not share our working directory, so profile
// files must be referenced by absolute path.
fn profile_target(arg: &str) -> Result<String> {
    let path = Path::new(arg);
    if !path.is_file() {
        return Ok(arg.to_string());
    }

    Ok(path
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", path.display()))?
        .to_string_lossy()
        .into_owned())
}

fn launch_agent(arg: &str, profile: &Profile, at: TimeOfDay) -> Result<LaunchAgent> {
    Ok(LaunchAgent::for_profile(
        profile,
        profile_target(arg)?,
        current_program()?,
        at,
    )?)
}

fn run_list_profiles() -> Result<Outcome> {
    for (name, _) in profiles::BUILTIN {
        if let Some(profile) = profiles::builtin(name)? {
            println!(
                "{:<10} {:<36} {}",
                name.bold(),
                profile.domain(),
                profile.profile.description
            );
        }
    }

    Ok(Outcome::Clean)
}

fn run_list_backups(backups: &BackupStore) -> Result<Outcome> {
    let listed = backups.list()?;
    if listed.is_empty() {
        println!("no backups in {}", backups.root().display());
        return Ok(Outcome::Clean);
    }

    for backup in listed {
        println!(
            "{}  {:<36} {}",
            backup.created.format("%Y-%m-%d %H:%M:%S").to_string().green(),
            backup.domain,
            backup.dir.display()
        );
    }

    Ok(Outcome::Clean)
}

fn print_summary(log: &RunLog, outcome: Outcome, backup: Option<&Backup>) {
    let warnings = log.count(LogLevel::Warning);
    let errors = log.count(LogLevel::Error);
    let status = match outcome {
        Outcome::Clean => "done".green().bold(),
        Outcome::Failed => "finished with failures".red().bold(),
    };

    eprintln!("{status}: {warnings} warnings, {errors} errors");
    if let Some(backup) = backup {
        eprintln!("undo with: macprefs --restore {}", backup.dir.display());
    }
    if let Some(path) = log.path() {
        eprintln!("log written to {}", path.display());
    }
}
