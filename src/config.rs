//! Engine configuration
//!
//! Defines the knobs the archive engine reads: which 7-Zip binary to run,
//! where staging directories live, how long to wait for 7-Zip and which
//! extensions count as nested archives.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default ceiling for a single list or extract invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default nesting depth the installer will descend into.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 4;

/// Extensions treated as nested archives unless configured otherwise.
pub const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z"];

/// How extracted files are checked before being moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// The staged file must exist
    #[default]
    Exists,
    /// The staged file must exist and, when 7-Zip listed a size, match it
    SizeMatches,
}

/// Configuration shared by every archive handle
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit 7-Zip binary; discovered automatically when `None`
    pub seven_zip: Option<PathBuf>,

    /// Root under which per-archive staging directories are created
    pub temp_root: PathBuf,

    /// Ceiling for each list/extract invocation
    pub timeout: Duration,

    /// Lowercase extensions (without the dot) that mark nested archives
    pub archive_extensions: Vec<String>,

    /// Post-extraction validation policy
    pub validation: ValidationPolicy,

    /// Remove a top-level archive's staging directory after installation
    pub cleanup_staging: bool,

    /// How many levels of archives-within-archives the installer follows
    pub max_nesting_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seven_zip: None,
            temp_root: default_temp_root(),
            timeout: DEFAULT_TIMEOUT,
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            validation: ValidationPolicy::default(),
            cleanup_staging: true,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

/// `~/.cache/daz-installer/temp`, or the system temp dir if there is no cache dir
pub fn default_temp_root() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("daz-installer").join("temp"))
        .unwrap_or_else(|| std::env::temp_dir().join("daz-installer"))
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref tool) = self.seven_zip {
            if !tool.exists() {
                return Err(ConfigError::SevenZipNotFound(tool.clone()));
            }
        }

        if self.temp_root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyTempRoot);
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        if let Some(bad) = self
            .archive_extensions
            .iter()
            .find(|e| e.is_empty() || e.starts_with('.'))
        {
            return Err(ConfigError::InvalidExtension(bad.clone()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("7-Zip binary not found: {0}")]
    SevenZipNotFound(PathBuf),

    #[error("Temp root must not be empty")]
    EmptyTempRoot,

    #[error("Timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Invalid archive extension '{0}' (use lowercase without a leading dot)")]
    InvalidExtension(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.validation, ValidationPolicy::Exists);
    }

    #[test]
    fn test_missing_seven_zip_rejected() {
        let config = EngineConfig {
            seven_zip: Some(PathBuf::from("/definitely/not/here/7zz")),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::SevenZipNotFound(_))));
    }

    #[test]
    fn test_dotted_extension_rejected() {
        let config = EngineConfig {
            archive_extensions: vec![".zip".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidExtension(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));
    }
}
