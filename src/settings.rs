// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Apply and verify settings.
//!
//! Settings are written one after another in the order a profile lists them.
//! A failed write is logged and counted, and the remaining settings are still
//! applied. Nothing is rolled back: partial application is reported, not
//! undone. Taking a backup first is the way to undo a run.

use crate::{config::Setting, log::RunLog, store::PreferenceStore};

use tracing::instrument;

/// Whether mutating steps actually run.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Apply,

    /// Log every mutating step without performing it.
    DryRun,
}

/// Outcome of applying a list of settings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub attempted: usize,
    pub applied: usize,
    pub failed: Vec<String>,
}

impl ApplySummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Write each setting to `domain` in order.
///
/// In [`RunMode::DryRun`] the store is never called.
#[instrument(skip(store, settings, log), level = "debug")]
pub fn apply_settings(
    store: &impl PreferenceStore,
    domain: &str,
    settings: &[Setting],
    mode: RunMode,
    log: &mut RunLog,
) -> ApplySummary {
    let mut summary = ApplySummary::default();
    log.process(format!("applying {} settings to {domain}", settings.len()));
    let bar = log.start_progress(settings.len() as u64, domain.to_string());

    for setting in settings {
        summary.attempted += 1;
        let what = format!(
            "{} = {} ({})",
            setting.key,
            setting.value,
            setting.value.kind()
        );

        match mode {
            RunMode::DryRun => {
                log.info(format!("[dry run] would write {what}"));
            }
            RunMode::Apply => match store.write(domain, &setting.key, &setting.value) {
                Ok(()) => {
                    summary.applied += 1;
                    if setting.description.is_empty() {
                        log.info(format!("set {what}"));
                    } else {
                        log.info(format!("set {what}: {}", setting.description));
                    }
                }
                Err(err) => {
                    log.warning(format!("failed to set {}: {err}", setting.key));
                    summary.failed.push(setting.key.clone());
                }
            },
        }

        bar.inc(1);
    }

    log.finish_progress();
    match mode {
        RunMode::DryRun => log.info(format!("[dry run] {} settings not written", summary.attempted)),
        RunMode::Apply if summary.is_clean() => {
            log.success(format!("applied {}/{} settings", summary.applied, summary.attempted))
        }
        RunMode::Apply => log.warning(format!(
            "applied {}/{} settings, {} failed",
            summary.applied,
            summary.attempted,
            summary.failed.len()
        )),
    }

    summary
}

/// Outcome of checking critical keys.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn failures(&self) -> usize {
        self.missing.len()
    }
}

/// Re-read each critical key of `domain` and report those that are absent.
///
/// Only presence is checked, not whether the value is the intended one. A key
/// that cannot be read at all counts as missing.
#[instrument(skip(store, keys, log), level = "debug")]
pub fn verify_critical(
    store: &impl PreferenceStore,
    domain: &str,
    keys: &[String],
    log: &mut RunLog,
) -> VerifyReport {
    let mut report = VerifyReport::default();
    log.process(format!("verifying {} critical settings", keys.len()));

    for key in keys {
        report.checked += 1;
        match store.read(domain, key) {
            Ok(Some(value)) => log.success(format!("{key} present ({value})")),
            Ok(None) => {
                log.warning(format!("{key} is not set"));
                report.missing.push(key.clone());
            }
            Err(err) => {
                log.error(format!("cannot read {key}: {err}"));
                report.missing.push(key.clone());
            }
        }
    }

    if report.missing.is_empty() {
        log.success(format!("all {} critical settings present", report.checked));
    } else {
        log.warning(format!(
            "{}/{} critical settings missing",
            report.failures(),
            report.checked
        ));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SettingValue, store::MemoryStore};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn settings(keys: &[&str]) -> Vec<Setting> {
        keys.iter()
            .enumerate()
            .map(|(idx, key)| Setting::new(*key, SettingValue::Int(idx as i64), ""))
            .collect()
    }

    #[test_case(&["a", "b", "c", "d"], &[]; "no failures")]
    #[test_case(&["a", "b", "c", "d"], &["b"]; "one failure")]
    #[test_case(&["a", "b", "c", "d"], &["a", "d"]; "first and last fail")]
    #[test_case(&["a", "b"], &["a", "b"]; "everything fails")]
    #[test]
    fn partial_failure_applies_the_rest(keys: &[&str], refused: &[&str]) {
        let store = refused
            .iter()
            .fold(MemoryStore::new(), |store, key| store.refuse_key(key));
        let mut log = RunLog::in_memory(false);

        let summary = apply_settings(
            &store,
            "com.blah",
            &settings(keys),
            RunMode::Apply,
            &mut log,
        );

        pretty_assertions::assert_eq!(summary.attempted, keys.len());
        pretty_assertions::assert_eq!(summary.applied, keys.len() - refused.len());
        pretty_assertions::assert_eq!(summary.failed, refused.iter().map(ToString::to_string).collect::<Vec<_>>());
        for key in keys.iter().filter(|key| !refused.contains(key)) {
            assert!(store.value("com.blah", key).is_some());
        }
    }

    #[test]
    fn dry_run_performs_no_writes() {
        let store = MemoryStore::new().refuse_key("b");
        let mut log = RunLog::in_memory(false);

        let summary = apply_settings(
            &store,
            "com.blah",
            &settings(&["a", "b", "c"]),
            RunMode::DryRun,
            &mut log,
        );

        assert_eq!(store.mutation_count(), 0);
        assert_eq!(store.domain("com.blah"), None);
        assert_eq!(summary.applied, 0);
        assert!(summary.is_clean());
    }

    #[test]
    fn verify_reports_never_set_key_as_missing() {
        let store = MemoryStore::new().with_value("com.blah", "present", SettingValue::Bool(false));
        let mut log = RunLog::in_memory(false);

        let report = verify_critical(
            &store,
            "com.blah",
            &["present".into(), "absent".into()],
            &mut log,
        );

        assert_eq!(
            report,
            VerifyReport {
                checked: 2,
                missing: vec!["absent".into()],
            }
        );
        assert_eq!(store.mutation_count(), 0);
    }
}
