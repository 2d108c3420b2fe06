//! Host-side runtime configuration.
//!
//! # Invariants
//! - Every field has a default, so an empty JSON object is a valid config.
//! - `validate` runs on every load path; a returned config is always usable.

use crate::extension::manifest::LicenseTier;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_ACTION_WORKERS: usize = 64;

/// Configuration errors for host and extension config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Read { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "config_read_failed",
            Self::Parse { .. } => "config_parse_failed",
            Self::Invalid { .. } => "config_invalid",
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, message } => {
                write!(f, "failed to read config `{}`: {message}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "failed to parse config `{}`: {message}", path.display())
            }
            Self::Invalid { field, message } => write!(f, "invalid config `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Settings of one `ExtensionRuntime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root directory scanned for extension packages.
    pub extensions_dir: PathBuf,
    /// Semantic version of the host, checked against manifest host ranges.
    pub host_version: String,
    /// License tier the host runs under.
    pub license_tier: LicenseTier,
    pub action_workers: usize,
    pub action_queue_capacity: usize,
    pub action_timeout_ms: u64,
    /// Overrides the build-mode default level.
    pub log_level: Option<String>,
    /// File logging stays off when absent.
    pub log_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            extensions_dir: PathBuf::from("extensions"),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            license_tier: LicenseTier::Free,
            action_workers: 2,
            action_queue_capacity: 32,
            action_timeout_ms: 30_000,
            log_level: None,
            log_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|err| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(err) = semver::Version::parse(&self.host_version) {
            return Err(invalid("host_version", err.to_string()));
        }
        if self.action_workers == 0 || self.action_workers > MAX_ACTION_WORKERS {
            return Err(invalid(
                "action_workers",
                format!("must be within 1..={MAX_ACTION_WORKERS}"),
            ));
        }
        if self.action_queue_capacity == 0 {
            return Err(invalid("action_queue_capacity", "must be at least 1"));
        }
        if self.action_timeout_ms == 0 {
            return Err(invalid("action_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn host_semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.host_version).ok()
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.into(),
    }
}
