// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of profile files that macprefs applies, to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! # Profile Layout
//!
//! A __profile__ names one preference domain and the settings that should be
//! written to it. The `[profile]` table describes the domain itself, each
//! `[[setting]]` table is one key to write, and each optional `[[probe]]`
//! table is a read-only command to run when auditing.
//!
//! ```toml
//! [profile]
//! name = "finder"
//! description = "Finder defaults"
//! domain = "com.apple.finder"
//! application = "Finder"
//! critical = ["AppleShowAllFiles"]
//!
//! [[setting]]
//! key = "AppleShowAllFiles"
//! type = "bool"
//! value = true
//! description = "Show hidden files"
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Profile definition layout.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Settings for the profile itself.
    pub profile: ProfileSettings,

    /// Ordered listing of preference keys to write.
    #[serde(rename = "setting", default, skip_serializing_if = "Vec::is_empty")]
    pub settings: Vec<Setting>,

    /// Read-only commands to run during an audit.
    #[serde(rename = "probe", default, skip_serializing_if = "Vec::is_empty")]
    pub probes: Vec<Probe>,
}

impl Profile {
    /// Domain every setting of this profile is written to.
    pub fn domain(&self) -> &str {
        &self.profile.domain
    }

    /// Name of the profile.
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    fn validate(&self) -> Result<()> {
        validate_identifier("profile name", &self.profile.name)?;
        validate_identifier("domain", &self.profile.domain)?;
        if let Some(application) = &self.profile.application {
            validate_identifier("application", application)?;
        }

        for setting in &self.settings {
            validate_identifier("setting key", &setting.key)?;
        }

        for key in &self.profile.critical {
            validate_identifier("critical key", key)?;
            if !self.settings.iter().any(|setting| &setting.key == key) {
                return Err(ConfigError::UnknownCriticalKey(key.clone()));
            }
        }

        for probe in &self.probes {
            validate_identifier("probe command", &probe.command)?;
            if probe.timeout_secs == 0 {
                return Err(ConfigError::ZeroTimeout(probe.name.clone()));
            }
        }

        Ok(())
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut profile: Profile = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;
        profile.validate()?;

        // INVARIANT: Perform shell expansion on directory overrides.
        profile.profile.log_dir = profile.profile.log_dir.map(expand_path).transpose()?;
        profile.profile.backup_dir = profile.profile.backup_dir.map(expand_path).transpose()?;

        Ok(profile)
    }
}

impl Display for Profile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Profile-wide settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProfileSettings {
    /// Short name, used for log and LaunchAgent file names.
    pub name: String,

    /// Brief description of what the profile configures.
    #[serde(default)]
    pub description: String,

    /// Preference domain to write to, e.g., "com.apple.finder".
    pub domain: String,

    /// Application to quit before restoring a backup of the domain.
    pub application: Option<String>,

    /// Keys re-read after applying to confirm they exist.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub critical: Vec<String>,

    /// Refuse to run unless the effective user is root.
    #[serde(default)]
    pub require_root: bool,

    /// Override for the run log directory.
    pub log_dir: Option<PathBuf>,

    /// Override for the backup root directory.
    pub backup_dir: Option<PathBuf>,
}

/// Single preference key to write.
///
/// # Invariant
///
/// - Declared type always agrees with the literal value.
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
#[serde(try_from = "RawSetting", into = "RawSetting")]
pub struct Setting {
    pub key: String,
    pub value: SettingValue,
    pub description: String,
}

impl Setting {
    pub fn new(key: impl Into<String>, value: SettingValue, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value,
            description: description.into(),
        }
    }
}

/// On-disk shape of a setting before its type and value are reconciled.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawSetting {
    key: String,
    #[serde(rename = "type")]
    kind: ValueKind,
    value: toml::Value,
    #[serde(default)]
    description: String,
}

impl TryFrom<RawSetting> for Setting {
    type Error = ConfigError;

    fn try_from(raw: RawSetting) -> Result<Self, Self::Error> {
        let value = match (raw.kind, raw.value) {
            (ValueKind::Int, toml::Value::Integer(int)) => SettingValue::Int(int),
            (ValueKind::Bool, toml::Value::Boolean(boolean)) => SettingValue::Bool(boolean),
            (ValueKind::String, toml::Value::String(string)) => SettingValue::String(string),
            (ValueKind::Float, toml::Value::Float(float)) => SettingValue::Float(float),
            (ValueKind::Float, toml::Value::Integer(int)) => SettingValue::Float(int as f64),
            (kind, _) => {
                return Err(ConfigError::ValueMismatch {
                    key: raw.key,
                    kind,
                })
            }
        };

        Ok(Setting {
            key: raw.key,
            value,
            description: raw.description,
        })
    }
}

impl From<Setting> for RawSetting {
    fn from(setting: Setting) -> Self {
        let (kind, value) = match setting.value {
            SettingValue::Int(int) => (ValueKind::Int, toml::Value::Integer(int)),
            SettingValue::Bool(boolean) => (ValueKind::Bool, toml::Value::Boolean(boolean)),
            SettingValue::String(string) => (ValueKind::String, toml::Value::String(string)),
            SettingValue::Float(float) => (ValueKind::Float, toml::Value::Float(float)),
        };

        RawSetting {
            key: setting.key,
            kind,
            value,
            description: setting.description,
        }
    }
}

/// Declared type of a setting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Int,
    Bool,
    String,
    Float,
}

impl Display for ValueKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Int => "int",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Float => "float",
        })
    }
}

/// Typed value of a setting.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Int(i64),
    Bool(bool),
    String(String),
    Float(f64),
}

impl SettingValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Bool(_) => ValueKind::Bool,
            Self::String(_) => ValueKind::String,
            Self::Float(_) => ValueKind::Float,
        }
    }

    /// Type flag understood by `defaults write`.
    pub fn type_flag(&self) -> &'static str {
        match self {
            Self::Int(_) => "-int",
            Self::Bool(_) => "-bool",
            Self::String(_) => "-string",
            Self::Float(_) => "-float",
        }
    }

    /// Check whether output of `defaults read` represents this value.
    ///
    /// Booleans are printed as "1" or "0" by `defaults read`, so both those
    /// and the literal words are accepted.
    pub fn matches_output(&self, output: &str) -> bool {
        let output = output.trim();
        match self {
            Self::Int(int) => output.parse::<i64>().is_ok_and(|read| read == *int),
            Self::Bool(boolean) => match output.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => *boolean,
                "0" | "false" | "no" => !*boolean,
                _ => false,
            },
            Self::String(string) => output == string,
            Self::Float(float) => output
                .parse::<f64>()
                .is_ok_and(|read| (read - float).abs() < f64::EPSILON * 16.0),
        }
    }
}

impl Display for SettingValue {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Int(int) => write!(fmt, "{int}"),
            Self::Bool(boolean) => write!(fmt, "{boolean}"),
            Self::String(string) => fmt.write_str(string),
            Self::Float(float) => write!(fmt, "{float}"),
        }
    }
}

/// Read-only command run during an audit.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Probe {
    /// Label printed next to the probe result.
    pub name: String,

    /// Binary to execute. Never passed through a shell.
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Kill the command if it runs longer than this.
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

fn default_probe_timeout() -> u64 {
    30
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

// INVARIANT: Identifiers end up as argv entries of external commands, so
// they must never be mistaken for flags or carry control characters.
fn validate_identifier(what: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() || value.starts_with('-') || value.chars().any(char::is_control) {
        return Err(ConfigError::InvalidIdentifier {
            what,
            value: value.to_string(),
        });
    }

    Ok(())
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Declared type of setting does not agree with its value.
    #[error("setting {key:?} declares type {kind} but its value is not one")]
    ValueMismatch { key: String, kind: ValueKind },

    /// Identifier cannot be safely passed to an external command.
    #[error("invalid {what} {value:?}")]
    InvalidIdentifier { what: &'static str, value: String },

    /// Critical key does not name any setting of the profile.
    #[error("critical key {0:?} is not a setting of this profile")]
    UnknownCriticalKey(String),

    /// Probe would be killed before it could ever finish.
    #[error("probe {0:?} needs a timeout of at least one second")]
    ZeroTimeout(String),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[sealed_test(env = [("BLAH", "/Users/blah")])]
    fn deserialize_profile() -> anyhow::Result<()> {
        let result: Profile = r#"
            [profile]
            name = "finder"
            description = "blah blah blah"
            domain = "com.apple.finder"
            application = "Finder"
            critical = ["AppleShowAllFiles"]
            log_dir = "$BLAH/logs"

            [[setting]]
            key = "AppleShowAllFiles"
            type = "bool"
            value = true
            description = "Show hidden files"

            [[setting]]
            key = "FXPreferredViewStyle"
            type = "string"
            value = "Nlsv"

            [[probe]]
            name = "firewall"
            command = "socketfilterfw"
            args = ["--getglobalstate"]
        "#
        .parse()?;

        let expect = Profile {
            profile: ProfileSettings {
                name: "finder".into(),
                description: "blah blah blah".into(),
                domain: "com.apple.finder".into(),
                application: Some("Finder".into()),
                critical: vec!["AppleShowAllFiles".into()],
                require_root: false,
                log_dir: Some(PathBuf::from("/Users/blah/logs")),
                backup_dir: None,
            },
            settings: vec![
                Setting::new(
                    "AppleShowAllFiles",
                    SettingValue::Bool(true),
                    "Show hidden files",
                ),
                Setting::new(
                    "FXPreferredViewStyle",
                    SettingValue::String("Nlsv".into()),
                    "",
                ),
            ],
            probes: vec![Probe {
                name: "firewall".into(),
                command: "socketfilterfw".into(),
                args: vec!["--getglobalstate".into()],
                timeout_secs: 30,
            }],
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_profile() {
        let result = Profile {
            profile: ProfileSettings {
                name: "screensaver".into(),
                description: "blah".into(),
                domain: "com.apple.screensaver".into(),
                ..Default::default()
            },
            settings: vec![Setting::new(
                "askForPassword",
                SettingValue::Int(1),
                "Require password",
            )],
            probes: Vec::new(),
        }
        .to_string();

        let expect = indoc! {r#"
            [profile]
            name = "screensaver"
            description = "blah"
            domain = "com.apple.screensaver"
            require_root = false

            [[setting]]
            key = "askForPassword"
            type = "int"
            value = 1
            description = "Require password"
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn reject_type_value_mismatch() {
        let result = r#"
            [profile]
            name = "blah"
            domain = "com.blah"

            [[setting]]
            key = "Count"
            type = "int"
            value = "three"
        "#
        .parse::<Profile>();

        assert!(result.is_err());
    }

    #[test]
    fn reject_unknown_critical_key() {
        let result = r#"
            [profile]
            name = "blah"
            domain = "com.blah"
            critical = ["Missing"]
        "#
        .parse::<Profile>();

        assert!(matches!(result, Err(ConfigError::UnknownCriticalKey(key)) if key == "Missing"));
    }

    #[test]
    fn reject_flag_like_domain() {
        let result = r#"
            [profile]
            name = "blah"
            domain = "-currentHost"
        "#
        .parse::<Profile>();

        assert!(matches!(result, Err(ConfigError::InvalidIdentifier { .. })));
    }

    #[test]
    fn reject_zero_probe_timeout() {
        let result = r#"
            [profile]
            name = "blah"
            domain = "com.blah"

            [[probe]]
            name = "never finishes"
            command = "true"
            timeout_secs = 0
        "#
        .parse::<Profile>();

        assert!(matches!(result, Err(ConfigError::ZeroTimeout(name)) if name == "never finishes"));
    }

    #[test_case(SettingValue::Int(5), "5", true; "int matches")]
    #[test_case(SettingValue::Int(5), "6", false; "int differs")]
    #[test_case(SettingValue::Bool(true), "1\n", true; "bool prints as one")]
    #[test_case(SettingValue::Bool(false), "0", true; "bool prints as zero")]
    #[test_case(SettingValue::Bool(true), "0", false; "bool differs")]
    #[test_case(SettingValue::String("Nlsv".into()), "Nlsv\n", true; "string matches")]
    #[test_case(SettingValue::Float(0.5), "0.5", true; "float matches")]
    #[test_case(SettingValue::Float(0.5), "blah", false; "float garbage")]
    #[test]
    fn match_defaults_read_output(value: SettingValue, output: &str, expect: bool) {
        pretty_assertions::assert_eq!(value.matches_output(output), expect);
    }
}
