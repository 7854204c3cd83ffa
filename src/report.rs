// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Read-only audit of a profile.
//!
//! An audit compares what the preference store currently holds against what
//! the profile would write, checks that critical keys exist, and runs the
//! profile's probes. Nothing is written. Each probe runs under its own
//! timeout: a probe that hangs is killed and reported as failed.

use crate::{
    config::{Probe, Profile},
    exec::syscall_with_timeout,
    log::RunLog,
    settings::{verify_critical, VerifyReport},
    store::PreferenceStore,
};

use std::time::Duration;
use tracing::instrument;

/// State of one setting compared to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// Store holds the value the profile would write.
    Matching,

    /// Store holds some other value.
    Differs { current: String },

    /// Key has never been set.
    Absent,

    /// Key could not be read.
    Unreadable { reason: String },
}

/// Outcome of an audit.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub settings: Vec<(String, Drift)>,
    pub verify: VerifyReport,
    pub probes_run: usize,
    pub probes_failed: Vec<String>,
}

impl AuditReport {
    /// Number of settings not holding their intended value.
    pub fn drifted(&self) -> usize {
        self.settings
            .iter()
            .filter(|(_, drift)| *drift != Drift::Matching)
            .count()
    }

    /// Count of failures that should turn the exit status non-zero.
    pub fn failures(&self) -> usize {
        self.verify.failures() + self.probes_failed.len()
    }
}

/// Compare every setting of `profile` with the store.
pub fn compare_settings(
    store: &impl PreferenceStore,
    profile: &Profile,
    log: &mut RunLog,
) -> Vec<(String, Drift)> {
    log.process(format!("comparing {} settings", profile.settings.len()));

    let mut drifts = Vec::with_capacity(profile.settings.len());
    for setting in &profile.settings {
        let drift = match store.read(profile.domain(), &setting.key) {
            Ok(Some(current)) if setting.value.matches_output(&current) => Drift::Matching,
            Ok(Some(current)) => Drift::Differs { current },
            Ok(None) => Drift::Absent,
            Err(err) => Drift::Unreadable {
                reason: err.to_string(),
            },
        };

        match &drift {
            Drift::Matching => log.success(format!("{} = {}", setting.key, setting.value)),
            Drift::Differs { current } => log.warning(format!(
                "{} is {current}, profile wants {}",
                setting.key, setting.value
            )),
            Drift::Absent => log.warning(format!(
                "{} is not set, profile wants {}",
                setting.key, setting.value
            )),
            Drift::Unreadable { reason } => {
                log.error(format!("cannot read {}: {reason}", setting.key))
            }
        }

        drifts.push((setting.key.clone(), drift));
    }

    drifts
}

/// Run single probe, logging its output.
///
/// Returns `false` if the probe failed or timed out.
#[instrument(skip(probe, log), fields(probe = %probe.name), level = "debug")]
pub async fn run_probe(probe: &Probe, log: &mut RunLog) -> bool {
    let limit = Duration::from_secs(probe.timeout_secs);
    match syscall_with_timeout(&probe.command, &probe.args, limit).await {
        Ok(output) => {
            let output = output.trim();
            if output.is_empty() {
                log.success(format!("{}: ok", probe.name));
            } else {
                log.success(format!("{}: {output}", probe.name));
            }
            true
        }
        Err(err) => {
            log.error(format!("{}: {err}", probe.name));
            false
        }
    }
}

/// Audit `profile` without writing anything.
pub async fn audit(store: &impl PreferenceStore, profile: &Profile, log: &mut RunLog) -> AuditReport {
    let mut report = AuditReport {
        settings: compare_settings(store, profile, log),
        verify: verify_critical(store, profile.domain(), &profile.profile.critical, log),
        ..Default::default()
    };

    if !profile.probes.is_empty() {
        log.process(format!("running {} probes", profile.probes.len()));
    }

    // INVARIANT: Probes run strictly one after another.
    for probe in &profile.probes {
        report.probes_run += 1;
        if !run_probe(probe, log).await {
            report.probes_failed.push(probe.name.clone());
        }
    }

    let drifted = report.drifted();
    if drifted == 0 && report.failures() == 0 {
        log.success(format!("{} matches its profile", profile.domain()));
    } else {
        log.warning(format!(
            "{drifted} settings drifted, {} critical missing, {} probes failed",
            report.verify.failures(),
            report.probes_failed.len()
        ));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ProfileSettings, Setting, SettingValue},
        store::MemoryStore,
    };
    use pretty_assertions::assert_eq;

    fn profile(probes: Vec<Probe>) -> Profile {
        Profile {
            profile: ProfileSettings {
                name: "blah".into(),
                domain: "com.blah".into(),
                critical: vec!["Enabled".into()],
                ..Default::default()
            },
            settings: vec![
                Setting::new("Enabled", SettingValue::Bool(true), ""),
                Setting::new("Count", SettingValue::Int(3), ""),
                Setting::new("Name", SettingValue::String("blah".into()), ""),
            ],
            probes,
        }
    }

    #[tokio::test]
    async fn audit_classifies_each_setting() {
        let store = MemoryStore::new()
            .with_value("com.blah", "Enabled", SettingValue::Bool(true))
            .with_value("com.blah", "Count", SettingValue::Int(7));
        let mut log = RunLog::in_memory(false);

        let report = audit(&store, &profile(Vec::new()), &mut log).await;

        assert_eq!(
            report.settings,
            vec![
                ("Enabled".into(), Drift::Matching),
                ("Count".into(), Drift::Differs { current: "7".into() }),
                ("Name".into(), Drift::Absent),
            ]
        );
        assert_eq!(report.drifted(), 2);
        assert_eq!(report.failures(), 0);
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn failing_probe_is_counted() {
        let store = MemoryStore::new().with_value("com.blah", "Enabled", SettingValue::Bool(true));
        let mut log = RunLog::in_memory(false);
        let probes = vec![
            Probe {
                name: "works".into(),
                command: "true".into(),
                args: Vec::new(),
                timeout_secs: 5,
            },
            Probe {
                name: "broken".into(),
                command: "false".into(),
                args: Vec::new(),
                timeout_secs: 5,
            },
        ];

        let report = audit(&store, &profile(probes), &mut log).await;

        assert_eq!(report.probes_run, 2);
        assert_eq!(report.probes_failed, vec!["broken".to_string()]);
        assert_eq!(report.failures(), 1);
    }
}
