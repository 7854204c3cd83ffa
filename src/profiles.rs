// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Built-in profiles.
//!
//! A handful of profiles ship inside the binary so the common cases work
//! without writing any TOML. Anything else is loaded from a file path.

use crate::config::Profile;

use std::{fs::read_to_string, path::Path};
use tracing::debug;

/// Name and source of every profile compiled into the binary.
pub const BUILTIN: &[(&str, &str)] = &[
    ("security", include_str!("../profiles/security.toml")),
    ("finder", include_str!("../profiles/finder.toml")),
    ("dock", include_str!("../profiles/dock.toml")),
    ("firewall", include_str!("../profiles/firewall.toml")),
];

/// Look up built-in profile by name.
///
/// # Errors
///
/// - Return [`ProfileError::Config`] if the built-in profile fails to parse.
pub fn builtin(name: &str) -> Result<Option<Profile>> {
    BUILTIN
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, source)| source.parse::<Profile>().map_err(ProfileError::from))
        .transpose()
}

/// Resolve profile argument to a profile.
///
/// An argument that names an existing file is read as TOML. Otherwise it must
/// name a built-in profile.
///
/// # Errors
///
/// - Return [`ProfileError::Read`] if the profile file cannot be read.
/// - Return [`ProfileError::Config`] if the profile fails to parse.
/// - Return [`ProfileError::Unknown`] if nothing matches `arg`.
pub fn resolve(arg: &str) -> Result<Profile> {
    let path = Path::new(arg);
    if path.is_file() {
        debug!("load profile from {}", path.display());
        let content = read_to_string(path).map_err(|err| ProfileError::Read {
            path: path.into(),
            source: err,
        })?;
        return Ok(content.parse()?);
    }

    builtin(arg)?.ok_or_else(|| ProfileError::Unknown(arg.into()))
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read profile {:?}", path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("no profile file or built-in profile named {0:?}")]
    Unknown(String),
}

/// Friendly result alias :3
type Result<T, E = ProfileError> = std::result::Result<T, E>;
