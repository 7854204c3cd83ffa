// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Preference store access.
//!
//! macOS keeps application settings in named __preference domains__, e.g.,
//! "com.apple.finder", each a bucket of key/value pairs backed by a property
//! list. The `defaults` utility is the supported way to read, write, export,
//! and import those domains. Writing the plist files directly is unreliable,
//! because `cfprefsd` caches domains in memory and may overwrite edits.
//!
//! # Store Operations
//!
//! Everything macprefs needs from a preference store is captured by the
//! [`PreferenceStore`] trait. The real implementation, [`DefaultsStore`],
//! shells out to `defaults` and `killall`. The in-memory implementation,
//! [`MemoryStore`], lets backup, apply, and verify logic be exercised without
//! touching the system.

pub mod defaults;
pub mod memory;

pub use defaults::DefaultsStore;
pub use memory::MemoryStore;

use crate::config::SettingValue;

use std::path::Path;

/// Layer of indirection for preference domain access.
pub trait PreferenceStore {
    /// Write single key of a domain with a typed value.
    fn write(&self, domain: &str, key: &str, value: &SettingValue) -> Result<()>;

    /// Read single key of a domain.
    ///
    /// Returns `None` if the key has never been set.
    fn read(&self, domain: &str, key: &str) -> Result<Option<String>>;

    /// Export entire domain to a file.
    fn export(&self, domain: &str, path: &Path) -> Result<()>;

    /// Replace entire domain with contents of previously exported file.
    fn import(&self, domain: &str, path: &Path) -> Result<()>;

    /// Quit application owning a domain.
    ///
    /// Returns `false` if the application was not running.
    fn quit_application(&self, name: &str) -> Result<bool>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// External utility failed.
    #[error(transparent)]
    Exec(#[from] crate::exec::ExecError),

    /// Domain does not exist, or cannot be read.
    #[error("preference domain {0:?} does not exist")]
    MissingDomain(String),

    /// Snapshot file could not be read or written.
    #[error("failed to access snapshot at {:?}", path.display())]
    Snapshot {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot file is not in a format the store understands.
    #[error("malformed snapshot at {:?}: {message}", path.display())]
    MalformedSnapshot {
        path: std::path::PathBuf,
        message: String,
    },

    /// Write of a key was refused.
    #[error("cannot write {key:?} to {domain:?}")]
    Refused { domain: String, key: String },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
