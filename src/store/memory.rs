// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! In-memory preference store.
//!
//! Behaves like `defaults` closely enough to exercise backup, apply, verify,
//! and restore logic: booleans read back as "1" or "0", exporting a domain
//! that was never written fails, and importing replaces the whole domain.
//! Snapshots are written as TOML tables rather than property lists.

use crate::{
    config::SettingValue,
    store::{PreferenceStore, Result, StoreError},
};

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
    fs::{read_to_string, write},
    path::Path,
};

/// Key/value pairs of a single domain.
pub type Domain = BTreeMap<String, SettingValue>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    domains: RefCell<BTreeMap<String, Domain>>,
    running: RefCell<BTreeSet<String>>,
    refused: BTreeSet<String>,
    mutations: Cell<usize>,
    reads: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed key without counting it as a mutation.
    pub fn with_value(self, domain: &str, key: &str, value: SettingValue) -> Self {
        self.domains
            .borrow_mut()
            .entry(domain.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Make every write to `key` fail.
    pub fn refuse_key(mut self, key: &str) -> Self {
        self.refused.insert(key.into());
        self
    }

    /// Pretend application is running.
    pub fn with_running(self, name: &str) -> Self {
        self.running.borrow_mut().insert(name.into());
        self
    }

    /// Number of writes, imports, and quits performed.
    pub fn mutation_count(&self) -> usize {
        self.mutations.get()
    }

    /// Number of keys read back.
    pub fn read_count(&self) -> usize {
        self.reads.get()
    }

    pub fn domain(&self, domain: &str) -> Option<Domain> {
        self.domains.borrow().get(domain).cloned()
    }

    pub fn value(&self, domain: &str, key: &str) -> Option<SettingValue> {
        self.domains
            .borrow()
            .get(domain)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.borrow().contains(name)
    }

    fn mutated(&self) {
        self.mutations.set(self.mutations.get() + 1);
    }
}

impl PreferenceStore for MemoryStore {
    fn write(&self, domain: &str, key: &str, value: &SettingValue) -> Result<()> {
        if self.refused.contains(key) {
            return Err(StoreError::Refused {
                domain: domain.into(),
                key: key.into(),
            });
        }

        self.mutated();
        self.domains
            .borrow_mut()
            .entry(domain.into())
            .or_default()
            .insert(key.into(), value.clone());

        Ok(())
    }

    fn read(&self, domain: &str, key: &str) -> Result<Option<String>> {
        self.reads.set(self.reads.get() + 1);
        Ok(self.value(domain, key).map(|value| match value {
            SettingValue::Bool(true) => "1".into(),
            SettingValue::Bool(false) => "0".into(),
            value => value.to_string(),
        }))
    }

    fn export(&self, domain: &str, path: &Path) -> Result<()> {
        let entries = self
            .domain(domain)
            .ok_or_else(|| StoreError::MissingDomain(domain.into()))?;

        let table = entries
            .into_iter()
            .map(|(key, value)| (key, to_toml(value)))
            .collect::<toml::Table>();
        write(path, table.to_string()).map_err(|err| StoreError::Snapshot {
            path: path.into(),
            source: err,
        })?;

        Ok(())
    }

    fn import(&self, domain: &str, path: &Path) -> Result<()> {
        let content = read_to_string(path).map_err(|err| StoreError::Snapshot {
            path: path.into(),
            source: err,
        })?;
        let table: toml::Table =
            content
                .parse()
                .map_err(|err: toml::de::Error| StoreError::MalformedSnapshot {
                    path: path.into(),
                    message: err.to_string(),
                })?;

        let mut entries = Domain::new();
        for (key, value) in table {
            let value = from_toml(value).ok_or_else(|| StoreError::MalformedSnapshot {
                path: path.into(),
                message: format!("unsupported value for {key:?}"),
            })?;
            entries.insert(key, value);
        }

        self.mutated();
        self.domains.borrow_mut().insert(domain.into(), entries);

        Ok(())
    }

    fn quit_application(&self, name: &str) -> Result<bool> {
        self.mutated();
        Ok(self.running.borrow_mut().remove(name))
    }
}

fn to_toml(value: SettingValue) -> toml::Value {
    match value {
        SettingValue::Int(int) => toml::Value::Integer(int),
        SettingValue::Bool(boolean) => toml::Value::Boolean(boolean),
        SettingValue::String(string) => toml::Value::String(string),
        SettingValue::Float(float) => toml::Value::Float(float),
    }
}

fn from_toml(value: toml::Value) -> Option<SettingValue> {
    match value {
        toml::Value::Integer(int) => Some(SettingValue::Int(int)),
        toml::Value::Boolean(boolean) => Some(SettingValue::Bool(boolean)),
        toml::Value::String(string) => Some(SettingValue::String(string)),
        toml::Value::Float(float) => Some(SettingValue::Float(float)),
        _ => None,
    }
}
