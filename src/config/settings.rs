//! User settings
//!
//! Optional per-user preferences read from `<config dir>/rsake/settings.yml`
//! (e.g. `~/.config/rsake/settings.yml` on Linux). A missing file means
//! defaults.

use crate::error::{ConfigError, ConfigResult};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Placeholder replaced by the task name in `task-name-format`
pub const TASK_NAME_PLACEHOLDER: &str = "{name}";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Header printed when a task starts
    pub task_name_format: String,

    /// Print captured command output with failures
    pub verbose_error: bool,

    pub colored_output: bool,

    /// Diagnostic log level used when neither the flag nor `RSAKE_LOG` is set
    pub log_level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            task_name_format: format!("Executing {}", TASK_NAME_PLACEHOLDER),
            verbose_error: false,
            colored_output: true,
            log_level: None,
        }
    }
}

impl Settings {
    /// Default location of the settings file, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.config_dir().join("rsake").join("settings.yml"))
    }

    /// Load from the default location
    pub fn load() -> ConfigResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`; a missing or empty file yields defaults
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            ConfigError::Invalid(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&contents).map_err(|e| {
            ConfigError::Invalid(format!("Invalid settings in '{}': {}", path.display(), e))
        })
    }

    /// Render the task header for `task`
    pub fn task_header(&self, task: &str) -> String {
        self.task_name_format.replace(TASK_NAME_PLACEHOLDER, task)
    }
}
