// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Preference store backed by the `defaults` utility.

use crate::{
    config::SettingValue,
    exec::{syscall_capture, syscall_non_interactive, ExecError},
    store::{PreferenceStore, Result, StoreError},
};

use std::{ffi::OsString, path::Path};
use tracing::{debug, instrument};

/// Preference store that shells out to `defaults` and `killall`.
#[derive(Debug, Default, Clone)]
pub struct DefaultsStore;

impl DefaultsStore {
    pub fn new() -> Self {
        Self
    }
}

impl PreferenceStore for DefaultsStore {
    #[instrument(skip(self, value), level = "debug")]
    fn write(&self, domain: &str, key: &str, value: &SettingValue) -> Result<()> {
        let args: Vec<OsString> = vec![
            "write".into(),
            domain.into(),
            key.into(),
            value.type_flag().into(),
            value.to_string().into(),
        ];
        syscall_non_interactive("defaults", args)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn read(&self, domain: &str, key: &str) -> Result<Option<String>> {
        let output = syscall_capture("defaults", ["read", domain, key])?;
        if output.success {
            return Ok(Some(output.stdout));
        }

        // INVARIANT: Missing keys and missing domains both read as unset.
        if output.stderr.contains("does not exist") {
            debug!("{domain} {key} is not set");
            return Ok(None);
        }

        Err(StoreError::Exec(ExecError::Failed {
            command: "defaults".into(),
            message: output.stderr,
        }))
    }

    #[instrument(skip(self), level = "debug")]
    fn export(&self, domain: &str, path: &Path) -> Result<()> {
        let args: [OsString; 3] = ["export".into(), domain.into(), path.into()];
        let output = syscall_capture("defaults", args)?;
        if !output.success {
            debug!("export of {domain} failed: {}", output.stderr);
            return Err(StoreError::MissingDomain(domain.into()));
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn import(&self, domain: &str, path: &Path) -> Result<()> {
        let args: [OsString; 3] = ["import".into(), domain.into(), path.into()];
        syscall_non_interactive("defaults", args)?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn quit_application(&self, name: &str) -> Result<bool> {
        // INVARIANT: killall exits with 1 when no process matched.
        let output = syscall_capture("killall", [name])?;
        Ok(output.success)
    }
}
