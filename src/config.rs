use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, Result};
use crate::paths::{default_distributions_dir, default_instances_dir, default_runtimes_dir};

/// Load the manager configuration from a TOML file.
///
/// A missing file yields the defaults; every field is optional in the file.
pub fn load_config(path: &Path) -> Result<ManagerConfig> {
    if !path.exists() {
        log::info!("Config file {:?} not found, using defaults", path);
        return Ok(ManagerConfig::default());
    }
    let content = fs::read_to_string(path).map_err(|e| ManagerError::config(e.to_string()))?;
    let config: ManagerConfig =
        toml::from_str(&content).map_err(|e| ManagerError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Write a configuration file, creating parent directories.
pub fn save_config(path: &Path, config: &ManagerConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ManagerError::config(e.to_string()))?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content).map_err(|e| ManagerError::config(e.to_string()))
}

/// Settings shared by the pool, the factory and every provider.
///
/// Built once at start-up and passed in by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Instance home directories live at `<base_path>/<id>`.
    #[serde(default = "default_instances_dir")]
    pub base_path: PathBuf,
    #[serde(default = "default_bolt_port")]
    pub start_bolt_port: u16,
    #[serde(default = "default_http_port")]
    pub start_http_port: u16,
    #[serde(default = "default_distributions_dir")]
    pub distributions_path: PathBuf,
    #[serde(default = "default_runtimes_dir")]
    pub runtimes_path: PathBuf,
    /// Explicit Java home; takes precedence over every other lookup.
    #[serde(default)]
    pub java_home: Option<PathBuf>,
    /// Version catalog override; the embedded catalog is used when unset.
    #[serde(default)]
    pub versions_file: Option<PathBuf>,
    /// Prefix prepended to distribution download URLs.
    #[serde(default)]
    pub download_mirror: String,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

fn default_bolt_port() -> u16 {
    7691
}

fn default_http_port() -> u16 {
    7401
}

fn default_startup_timeout_secs() -> u64 {
    120
}

fn default_readiness_interval_ms() -> u64 {
    500
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_monitor_interval_secs() -> u64 {
    5
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            base_path: default_instances_dir(),
            start_bolt_port: default_bolt_port(),
            start_http_port: default_http_port(),
            distributions_path: default_distributions_dir(),
            runtimes_path: default_runtimes_dir(),
            java_home: None,
            versions_file: None,
            download_mirror: String::new(),
            startup_timeout_secs: default_startup_timeout_secs(),
            readiness_interval_ms: default_readiness_interval_ms(),
            stop_grace_secs: default_stop_grace_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.start_bolt_port == 0 || self.start_http_port == 0 {
            return Err(ManagerError::config("start ports must be non-zero"));
        }
        if self.readiness_interval_ms == 0 {
            return Err(ManagerError::config("readiness_interval_ms must be non-zero"));
        }
        if self.base_path.as_os_str().is_empty() {
            return Err(ManagerError::config("base_path must not be empty"));
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.toml");
        fs::write(&path, "start_bolt_port = 9000\nbase_path = \"/srv/neo4j\"\n").unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.start_bolt_port, 9000);
        assert_eq!(config.start_http_port, 7401);
        assert_eq!(config.base_path, PathBuf::from("/srv/neo4j"));
        assert_eq!(config.stop_grace_period(), Duration::from_secs(10));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.start_http_port, 7401);
    }

    #[test]
    fn zero_start_port_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.toml");
        fs::write(&path, "start_http_port = 0\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("manager.toml");
        let config = ManagerConfig {
            java_home: Some(PathBuf::from("/opt/zulu8")),
            startup_timeout_secs: 30,
            ..ManagerConfig::default()
        };

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.java_home, Some(PathBuf::from("/opt/zulu8")));
        assert_eq!(loaded.startup_timeout(), Duration::from_secs(30));
    }
}
