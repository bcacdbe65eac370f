//! Application configuration
//!
//! Read from the YAML file named by `COOPER_CONFIG`, or `cooper.yaml` in the
//! working directory. A missing or empty file means defaults; command-line
//! flags override whatever the file says.
//!
//! ```yaml
//! session_name: nightly
//! record_metrics: true
//! output_path: out/session.json
//! database_path: out/cooper.db
//! ```

use std::path::{Path, PathBuf};

use cooper_core::RecorderConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "COOPER_CONFIG";

/// Config file used when `COOPER_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "cooper.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name given to recorded sessions
    pub session_name: String,
    /// Record utilization samples
    pub record_metrics: bool,
    /// Where to write the JSON snapshot; stdout when unset
    pub output_path: Option<PathBuf>,
    /// SQLite database to export into; no export when unset
    pub database_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_name: "cooper".to_string(),
            record_metrics: true,
            output_path: None,
            database_path: None,
        }
    }
}

impl AppConfig {
    /// Load from `COOPER_CONFIG` or `cooper.yaml`
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::from_path(path)
    }

    /// Load from `path`, falling back to defaults when it does not exist
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Session configuration derived from this file
    pub fn recorder(&self) -> RecorderConfig {
        RecorderConfig::default().with_metrics(self.record_metrics)
    }

    pub fn with_session_name(mut self, name: Option<String>) -> Self {
        if let Some(name) = name {
            self.session_name = name;
        }
        self
    }

    /// `--no-metrics` can only turn recording off
    pub fn with_no_metrics(mut self, no_metrics: bool) -> Self {
        if no_metrics {
            self.record_metrics = false;
        }
        self
    }

    pub fn with_output_path(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.output_path = path;
        }
        self
    }

    pub fn with_database_path(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.database_path = path;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::from_path(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.recorder().record_metrics);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session_name: nightly\nrecord_metrics: false").unwrap();

        let config = AppConfig::from_path(file.path()).unwrap();
        assert_eq!(config.session_name, "nightly");
        assert!(!config.recorder().record_metrics);
        assert_eq!(config.database_path, None);
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(AppConfig::from_yaml("  \n").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(AppConfig::from_yaml("record_metrics: [oops").is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let config = AppConfig::from_yaml("session_name: file\noutput_path: a.json")
            .unwrap()
            .with_session_name(Some("flag".into()))
            .with_no_metrics(true)
            .with_output_path(None)
            .with_database_path(Some(PathBuf::from("b.db")));

        assert_eq!(config.session_name, "flag");
        assert!(!config.record_metrics);
        assert_eq!(config.output_path, Some(PathBuf::from("a.json")));
        assert_eq!(config.database_path, Some(PathBuf::from("b.db")));
    }
}
