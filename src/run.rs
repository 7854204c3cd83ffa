// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Whole runs of a profile.
//!
//! A __configure__ run backs up the domain, applies every setting, and
//! verifies the critical keys. A __restore__ run re-imports one backup after
//! the user confirmed it. Both only report whether every step went through.
//! The individual failures already sit in the run log.

use crate::{
    backup::{check_restorable, restore, Backup, BackupError, BackupStore, RestoreMode},
    config::Profile,
    log::RunLog,
    settings::{apply_settings, verify_critical, ApplySummary, RunMode},
    store::PreferenceStore,
};

use std::path::PathBuf;
use tracing::instrument;

/// Whether every step of a run went through.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    Failed,
}

impl Outcome {
    pub fn from_failures(failures: usize) -> Self {
        if failures == 0 {
            Self::Clean
        } else {
            Self::Failed
        }
    }
}

/// What a configure run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureRun {
    /// Backup taken before applying, if any.
    pub backup: Option<Backup>,
    pub applied: ApplySummary,

    /// Critical keys not found after applying.
    pub missing: Vec<String>,
}

impl ConfigureRun {
    pub fn outcome(&self) -> Outcome {
        Outcome::from_failures(self.applied.failed.len() + self.missing.len())
    }
}

/// Back up, apply, and verify `profile`.
///
/// Quick runs skip backup and verification. Dry runs take no backup and skip
/// verification of the settings they never wrote. A failed backup is only a
/// warning.
#[instrument(skip(store, profile, backups, log), level = "debug")]
pub fn run_configure(
    store: &impl PreferenceStore,
    profile: &Profile,
    backups: &BackupStore,
    mode: RunMode,
    quick: bool,
    log: &mut RunLog,
) -> ConfigureRun {
    let backup = if quick {
        log.info("quick run: skipping backup");
        None
    } else if mode == RunMode::DryRun {
        log.info(format!(
            "[dry run] would back up {} to {}",
            profile.domain(),
            backups.root().display()
        ));
        None
    } else {
        backups.create(store, profile.domain(), log)
    };

    let applied = apply_settings(store, profile.domain(), &profile.settings, mode, log);

    let missing = if quick {
        log.info("quick run: skipping verification");
        Vec::new()
    } else if mode == RunMode::DryRun {
        log.info("[dry run] skipping verification of unwritten settings");
        Vec::new()
    } else {
        verify_critical(store, profile.domain(), &profile.profile.critical, log).missing
    };

    ConfigureRun {
        backup,
        applied,
        missing,
    }
}

/// Restore backup `dir`, or the newest backup of the profile's domain.
///
/// The backup is checked before `confirm` is asked anything. Declining
/// leaves the domain untouched and still counts as a clean run. Dry runs never
/// ask.
///
/// # Errors
///
/// - Return [`RunError::NoBackup`] if no `dir` was given and the store holds
///   no backup of the domain.
/// - Return [`RunError::Prompt`] if `confirm` cannot ask the user.
#[instrument(skip(store, profile, backups, confirm, log), level = "debug")]
pub fn run_restore(
    store: &impl PreferenceStore,
    profile: &Profile,
    backups: &BackupStore,
    dir: Option<PathBuf>,
    mode: RunMode,
    confirm: impl FnOnce(&str) -> Result<bool, inquire::InquireError>,
    log: &mut RunLog,
) -> Result<Outcome> {
    let dir = match dir {
        Some(dir) => dir,
        None => backups
            .latest(Some(profile.domain()))?
            .map(|backup| backup.dir)
            .ok_or_else(|| RunError::NoBackup {
                domain: profile.domain().into(),
                root: backups.root().into(),
            })?,
    };

    if let Err(err) = check_restorable(&dir, profile.domain()) {
        log.error(format!("cannot restore: {err}"));
        return Ok(Outcome::Failed);
    }

    if mode == RunMode::Apply {
        let question = format!("Replace {} with backup {}?", profile.domain(), dir.display());
        if !confirm(&question)? {
            log.info("restore cancelled");
            return Ok(Outcome::Clean);
        }
    }

    let restore_mode = match mode {
        RunMode::Apply => RestoreMode::Apply,
        RunMode::DryRun => RestoreMode::DryRun,
    };

    // INVARIANT: Failure is already in the run log, so it only sets the outcome.
    match restore(
        store,
        &dir,
        profile.domain(),
        profile.profile.application.as_deref(),
        restore_mode,
        log,
    ) {
        Ok(()) => Ok(Outcome::Clean),
        Err(_) => Ok(Outcome::Failed),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("no backup of {domain} in {:?}", root.display())]
    NoBackup { domain: String, root: PathBuf },

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Prompt(#[from] inquire::InquireError),
}

/// Friendly result alias :3
type Result<T, E = RunError> = std::result::Result<T, E>;
