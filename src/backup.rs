// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup store management.
//!
//! Before changing a preference domain, macprefs exports its current state
//! into a fresh __backup__. All backups live in one place called the
//! __backup store__. A backup can later be re-imported to undo a run.
//!
//! # Backup Store Layout
//!
//! The backup store can be placed anywhere on the user's file system. Each
//! backup is a directory named after the domain it holds plus the moment it
//! was taken, e.g., `com.apple.finder_20250304_050607`. Inside lives the
//! exported snapshot `com.apple.finder.plist` and a `backup_timestamp.txt`
//! marker holding the time of the backup and the full domain name.
//! Directories without the marker are not considered backups.
//!
//! Backups are never mutated after creation, and never deleted by macprefs.
//! Restoring is all-or-nothing: the snapshot replaces the whole domain. There
//! is no merging, diffing, or partial restore.

use crate::{log::RunLog, store::PreferenceStore};

use chrono::{Local, NaiveDateTime, SubsecRound};
use std::{
    fs::{create_dir_all, read_to_string, remove_dir_all, write},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Name of marker file present in every backup directory.
pub const TIMESTAMP_FILE: &str = "backup_timestamp.txt";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DIR_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Root directory of all backups.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    /// Open backup store at target path.
    ///
    /// Does not create the directory. That only happens once a backup is
    /// actually taken.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Export preference domain into a fresh timestamped backup.
    ///
    /// Failure is logged as a warning, and `None` is returned so the caller
    /// can carry on without a backup. No half-written backup is left behind.
    #[instrument(skip(self, store, log), level = "debug")]
    pub fn create(
        &self,
        store: &impl PreferenceStore,
        domain: &str,
        log: &mut RunLog,
    ) -> Option<Backup> {
        log.process(format!("backing up {domain}"));
        match self.try_create(store, domain) {
            Ok(backup) => {
                log.success(format!("backup written to {}", backup.dir.display()));
                Some(backup)
            }
            Err(err) => {
                log.warning(format!("could not back up {domain}: {err}"));
                None
            }
        }
    }

    fn try_create(&self, store: &impl PreferenceStore, domain: &str) -> Result<Backup> {
        // INVARIANT: Match the precision of the marker file.
        let created = Local::now().naive_local().trunc_subsecs(0);
        let dir = self.fresh_dir(domain, &created);
        create_dir_all(&dir).map_err(|err| BackupError::Io {
            path: dir.clone(),
            source: err,
        })?;

        let backup = Backup {
            dir,
            domain: domain.into(),
            created,
        };

        // INVARIANT: Remove the directory again if the snapshot cannot be
        // taken, so that a directory with a marker always holds a snapshot.
        let result = store
            .export(domain, &backup.snapshot_path())
            .map_err(BackupError::from)
            .and_then(|_| {
                write(
                    backup.dir.join(TIMESTAMP_FILE),
                    format!("{}\n{domain}\n", created.format(TIMESTAMP_FORMAT)),
                )
                .map_err(|err| BackupError::Io {
                    path: backup.dir.join(TIMESTAMP_FILE),
                    source: err,
                })
            });

        if let Err(err) = result {
            if let Err(cleanup) = remove_dir_all(&backup.dir) {
                warn!("cannot remove {}: {cleanup}", backup.dir.display());
            }
            return Err(err);
        }

        Ok(backup)
    }

    fn fresh_dir(&self, domain: &str, created: &NaiveDateTime) -> PathBuf {
        let base = format!("{}_{}", file_safe(domain), created.format(DIR_STAMP_FORMAT));
        let mut dir = self.root.join(&base);
        let mut suffix = 1;
        while dir.exists() {
            dir = self.root.join(format!("{base}_{suffix}"));
            suffix += 1;
        }

        dir
    }

    /// List all backups in the store, newest first.
    ///
    /// A missing store directory simply holds no backups.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Pattern`] if the store path cannot be turned
    ///   into a glob pattern.
    pub fn list(&self) -> Result<Vec<Backup>> {
        let pattern = format!(
            "{}/*/{TIMESTAMP_FILE}",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );

        let mut backups = Vec::new();
        for marker in glob::glob(&pattern)?.flatten() {
            let Some(dir) = marker.parent() else {
                continue;
            };

            match Backup::load(dir) {
                Ok(backup) => backups.push(backup),
                Err(err) => debug!("skip {}: {err}", dir.display()),
            }
        }

        backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.dir.cmp(&a.dir)));
        Ok(backups)
    }

    /// Newest backup in the store, optionally restricted to one domain.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Pattern`] if the store cannot be listed.
    pub fn latest(&self, domain: Option<&str>) -> Result<Option<Backup>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|backup| domain.is_none_or(|domain| backup.domain == domain)))
    }
}

/// Single timestamped snapshot of one preference domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub dir: PathBuf,
    pub domain: String,
    pub created: NaiveDateTime,
}

impl Backup {
    /// Load existing backup directory.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::MissingDir`] if `dir` does not exist.
    /// - Return [`BackupError::MissingSnapshot`] if `dir` holds no snapshot.
    /// - Return [`BackupError::BadTimestamp`] if the marker is unreadable, or
    ///   does not name a domain.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(BackupError::MissingDir(dir.into()));
        }

        let marker = dir.join(TIMESTAMP_FILE);
        let stamp = read_to_string(&marker).map_err(|_| BackupError::BadTimestamp(marker.clone()))?;
        let mut lines = stamp.lines().map(str::trim);
        let created = lines
            .next()
            .and_then(|line| NaiveDateTime::parse_from_str(line, TIMESTAMP_FORMAT).ok())
            .ok_or_else(|| BackupError::BadTimestamp(marker.clone()))?;

        let domain = lines
            .next()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackupError::BadTimestamp(marker.clone()))?;

        let snapshot = snapshot_path(dir, &domain);
        if !snapshot.is_file() {
            return Err(BackupError::MissingSnapshot(snapshot));
        }

        Ok(Self {
            dir: dir.into(),
            domain,
            created,
        })
    }

    /// Path to exported snapshot of this backup.
    pub fn snapshot_path(&self) -> PathBuf {
        snapshot_path(&self.dir, &self.domain)
    }
}

fn snapshot_path(dir: &Path, domain: &str) -> PathBuf {
    dir.join(format!("{}.plist", file_safe(domain)))
}

// INVARIANT: Domains given as plist paths, e.g.,
// "/Library/Preferences/com.apple.alf", keep only their final component.
fn file_safe(domain: &str) -> String {
    Path::new(domain)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| domain.to_string())
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// How restore should treat the preference store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RestoreMode {
    Apply,
    DryRun,
}

/// Re-import backup directory into a preference domain.
///
/// Checks that `dir` and its snapshot for `domain` exist before touching
/// anything. Then quits `application` if it is running, and imports the
/// snapshot, replacing the whole domain.
///
/// # Errors
///
/// - Return [`BackupError::MissingDir`] if `dir` does not exist.
/// - Return [`BackupError::MissingSnapshot`] if `dir` has no snapshot of
///   `domain`.
/// - Return [`BackupError::Store`] if the import itself fails.
#[instrument(skip(store, log), level = "debug")]
pub fn restore(
    store: &impl PreferenceStore,
    dir: &Path,
    domain: &str,
    application: Option<&str>,
    mode: RestoreMode,
    log: &mut RunLog,
) -> Result<()> {
    log.process(format!("restoring {domain} from {}", dir.display()));

    let checked = check_restorable(dir, domain);
    if let Err(err) = &checked {
        log.error(format!("cannot restore: {err}"));
    }
    let snapshot = checked?;

    if mode == RestoreMode::DryRun {
        if let Some(application) = application {
            log.info(format!("[dry run] would quit {application}"));
        }
        log.info(format!("[dry run] would import {}", snapshot.display()));
        return Ok(());
    }

    if let Some(application) = application {
        match store.quit_application(application) {
            Ok(true) => log.info(format!("quit {application}")),
            Ok(false) => log.info(format!("{application} was not running")),
            Err(err) => log.warning(format!("could not quit {application}: {err}")),
        }
    }

    match store.import(domain, &snapshot) {
        Ok(()) => {
            log.success(format!("restored {domain} from {}", dir.display()));
            Ok(())
        }
        Err(err) => {
            log.error(format!("restore of {domain} failed: {err}"));
            Err(err.into())
        }
    }
}

/// Path to snapshot of `domain` inside backup directory `dir`.
///
/// Touches nothing, so it can run before asking the user anything.
///
/// # Errors
///
/// - Return [`BackupError::MissingDir`] if `dir` does not exist.
/// - Return [`BackupError::MissingSnapshot`] if `dir` has no snapshot of
///   `domain`.
pub fn check_restorable(dir: &Path, domain: &str) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(BackupError::MissingDir(dir.into()));
    }

    let snapshot = snapshot_path(dir, domain);
    if !snapshot.is_file() {
        return Err(BackupError::MissingSnapshot(snapshot));
    }

    Ok(snapshot)
}

/// All possible error types for backup store interaction.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup directory {:?} does not exist", .0.display())]
    MissingDir(PathBuf),

    #[error("backup snapshot {:?} does not exist", .0.display())]
    MissingSnapshot(PathBuf),

    #[error("backup marker {:?} is missing or malformed", .0.display())]
    BadTimestamp(PathBuf),

    #[error("failed to access {:?}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Friendly result alias :3
type Result<T, E = BackupError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SettingValue, store::MemoryStore};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn seeded_store() -> MemoryStore {
        MemoryStore::new()
            .with_value("com.blah", "Count", SettingValue::Int(3))
            .with_value("com.blah", "Enabled", SettingValue::Bool(true))
            .with_value("com.blah", "Name", SettingValue::String("blah".into()))
    }

    #[sealed_test]
    fn backup_then_restore_reproduces_domain() -> anyhow::Result<()> {
        let store = seeded_store().with_running("Blah");
        let original = store.domain("com.blah");
        let backups = BackupStore::open("backups");
        let mut log = RunLog::in_memory(false);

        let backup = backups.create(&store, "com.blah", &mut log).unwrap();
        assert!(backup.dir.join(TIMESTAMP_FILE).is_file());
        assert!(backup.snapshot_path().is_file());

        store.write("com.blah", "Count", &SettingValue::Int(99))?;
        store.write("com.blah", "Extra", &SettingValue::Float(1.5))?;

        restore(
            &store,
            &backup.dir,
            "com.blah",
            Some("Blah"),
            RestoreMode::Apply,
            &mut log,
        )?;

        assert_eq!(store.domain("com.blah"), original);
        assert!(!store.is_running("Blah"));

        Ok(())
    }

    #[sealed_test]
    fn restore_missing_dir_performs_no_mutation() {
        let store = seeded_store().with_running("Blah");
        let mut log = RunLog::in_memory(false);

        let result = restore(
            &store,
            Path::new("backups/nope"),
            "com.blah",
            Some("Blah"),
            RestoreMode::Apply,
            &mut log,
        );

        assert!(matches!(result, Err(BackupError::MissingDir(_))));
        assert_eq!(store.mutation_count(), 0);
        assert!(store.is_running("Blah"));
        assert_eq!(log.count(crate::log::LogLevel::Error), 1);
    }

    #[sealed_test]
    fn restore_dir_without_snapshot_fails() -> anyhow::Result<()> {
        create_dir_all("backups/empty")?;
        let store = seeded_store();
        let mut log = RunLog::in_memory(false);

        let result = restore(
            &store,
            Path::new("backups/empty"),
            "com.blah",
            None,
            RestoreMode::Apply,
            &mut log,
        );

        assert!(matches!(result, Err(BackupError::MissingSnapshot(_))));
        assert_eq!(store.mutation_count(), 0);

        Ok(())
    }

    #[sealed_test]
    fn dry_run_restore_touches_nothing() -> anyhow::Result<()> {
        let store = seeded_store().with_running("Blah");
        let backups = BackupStore::open("backups");
        let mut log = RunLog::in_memory(false);
        let backup = backups.create(&store, "com.blah", &mut log).unwrap();

        restore(
            &store,
            &backup.dir,
            "com.blah",
            Some("Blah"),
            RestoreMode::DryRun,
            &mut log,
        )?;

        assert_eq!(store.mutation_count(), 0);
        assert!(store.is_running("Blah"));

        Ok(())
    }

    #[sealed_test]
    fn failed_export_leaves_no_backup() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let backups = BackupStore::open("backups");
        let mut log = RunLog::in_memory(false);

        assert_eq!(backups.create(&store, "com.missing", &mut log), None);
        assert_eq!(log.count(crate::log::LogLevel::Warning), 1);
        assert_eq!(backups.list()?, Vec::new());

        Ok(())
    }

    #[sealed_test]
    fn list_backups_newest_first() -> anyhow::Result<()> {
        for (name, stamp) in [
            ("com.blah_20250101_000000", "2025-01-01 00:00:00"),
            ("com.blah_20250301_000000", "2025-03-01 00:00:00"),
            ("com.other_20250201_000000", "2025-02-01 00:00:00"),
        ] {
            let dir = Path::new("backups").join(name);
            create_dir_all(&dir)?;
            let domain = name.split('_').next().unwrap();
            write(dir.join(TIMESTAMP_FILE), format!("{stamp}\n{domain}\n"))?;
            write(dir.join(format!("{domain}.plist")), "")?;
        }
        create_dir_all("backups/not-a-backup")?;

        let backups = BackupStore::open("backups");
        let listed = backups
            .list()?
            .into_iter()
            .map(|backup| backup.dir)
            .collect::<Vec<_>>();
        assert_eq!(
            listed,
            vec![
                PathBuf::from("backups/com.blah_20250301_000000"),
                PathBuf::from("backups/com.other_20250201_000000"),
                PathBuf::from("backups/com.blah_20250101_000000"),
            ]
        );

        let latest = backups.latest(Some("com.other"))?.map(|backup| backup.dir);
        assert_eq!(latest, Some(PathBuf::from("backups/com.other_20250201_000000")));

        Ok(())
    }

    #[sealed_test]
    fn marker_without_domain_is_not_a_backup() -> anyhow::Result<()> {
        let dir = Path::new("backups/com.blah_20250101_000000");
        create_dir_all(dir)?;
        write(dir.join(TIMESTAMP_FILE), "2025-01-01 00:00:00\n")?;
        write(dir.join("com.blah.plist"), "")?;

        assert!(matches!(Backup::load(dir), Err(BackupError::BadTimestamp(_))));
        assert_eq!(BackupStore::open("backups").list()?, Vec::new());

        Ok(())
    }

    #[sealed_test]
    fn path_domain_is_backed_up_under_file_name() -> anyhow::Result<()> {
        let domain = "/Library/Preferences/com.apple.alf";
        let store = MemoryStore::new().with_value(domain, "globalstate", SettingValue::Int(0));
        let backups = BackupStore::open("backups");
        let mut log = RunLog::in_memory(false);

        let backup = backups.create(&store, domain, &mut log).unwrap();
        assert!(backup.dir.starts_with("backups"));
        assert!(backup.dir.join("com.apple.alf.plist").is_file());

        let latest = backups.latest(Some(domain))?;
        assert_eq!(latest, Some(backup));

        Ok(())
    }

    #[sealed_test]
    fn same_second_backups_get_distinct_dirs() {
        let store = seeded_store();
        let backups = BackupStore::open("backups");
        let mut log = RunLog::in_memory(false);

        let first = backups.create(&store, "com.blah", &mut log).unwrap();
        let second = backups.create(&store, "com.blah", &mut log).unwrap();

        assert_ne!(first.dir, second.dir);
    }
}
