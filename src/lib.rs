// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Back up, apply, verify, and restore macOS preference domains.
//!
//! A __profile__ lists the keys that should be written to one preference
//! domain. A run of macprefs exports the domain into a timestamped backup,
//! writes every key of the profile in order, re-reads the critical keys to
//! confirm they exist, and records each step in a per-run log. Any backup can
//! later be re-imported to undo a run.

pub mod backup;
pub mod config;
pub mod exec;
pub mod log;
pub mod path;
pub mod profiles;
pub mod report;
pub mod run;
pub mod schedule;
pub mod settings;
pub mod store;
