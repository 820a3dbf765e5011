//! Persistent user settings
//!
//! Reads user preferences from ~/.config/daz-installer/settings.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{EngineConfig, ValidationPolicy};

/// User settings for the installer
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Settings {
    /// Path to the 7-Zip binary (empty = discover)
    #[serde(default)]
    pub seven_zip_path: String,

    /// Root for staging directories (empty = cache dir)
    #[serde(default)]
    pub temp_dir: String,

    /// Content library used when `install` is given no destination
    #[serde(default)]
    pub default_library_dir: String,

    /// Seconds to wait for each list/extract run
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Extensions treated as nested archives (empty = zip, rar, 7z)
    #[serde(default)]
    pub archive_extensions: Vec<String>,

    #[serde(default)]
    pub validation: ValidationPolicy,

    /// Leave staging directories in place after installing
    #[serde(default)]
    pub keep_staging: bool,

    #[serde(default)]
    pub max_nesting_depth: Option<usize>,
}

impl Settings {
    /// Get the config directory path (~/.config/daz-installer)
    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("daz-installer");

        Ok(config_dir)
    }

    /// Get the settings file path
    fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|p| Self::try_load(&p)) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Could not load settings: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Try to load settings from `path`; a missing file gives defaults
    pub fn try_load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Engine configuration with these settings applied over the defaults
    pub fn to_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if !self.seven_zip_path.is_empty() {
            config.seven_zip = Some(PathBuf::from(&self.seven_zip_path));
        }
        if !self.temp_dir.is_empty() {
            config.temp_root = PathBuf::from(&self.temp_dir);
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if !self.archive_extensions.is_empty() {
            config.archive_extensions = self
                .archive_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect();
        }
        config.validation = self.validation;
        config.cleanup_staging = !self.keep_staging;
        if let Some(depth) = self.max_nesting_depth {
            config.max_nesting_depth = depth;
        }
        config
    }

    pub fn default_library(&self) -> Option<PathBuf> {
        (!self.default_library_dir.is_empty()).then(|| PathBuf::from(&self.default_library_dir))
    }
}
