//! Centralized path utilities for the manager.

use std::path::{Path, PathBuf};

/// Root data directory for the manager (`<data dir>/neo4j-manager`).
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("neo4j-manager")
}

pub fn default_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

pub fn default_instances_dir() -> PathBuf {
    get_data_dir().join("instances")
}

pub fn default_distributions_dir() -> PathBuf {
    get_data_dir().join("distributions")
}

pub fn default_runtimes_dir() -> PathBuf {
    get_data_dir().join("runtimes")
}

/// Home directory of an instance.
pub fn instance_home(base_path: &Path, instance_id: &str) -> PathBuf {
    base_path.join(instance_id)
}

/// Directory holding an instance's configuration files.
pub fn instance_conf_dir(home: &Path) -> PathBuf {
    home.join("conf")
}

/// Cache directory for one distribution (`<edition>-<version>`).
pub fn distribution_dir(distributions_path: &Path, key: &str) -> PathBuf {
    distributions_path.join(key)
}

/// Unpacked server tree inside a distribution directory.
pub fn distribution_tree(distribution_dir: &Path) -> PathBuf {
    distribution_dir.join("neo4j")
}

/// Marker written once a distribution is completely unpacked.
pub fn distribution_marker(distribution_dir: &Path) -> PathBuf {
    distribution_dir.join(".installed")
}

/// Java executable inside a Java home.
pub fn java_exe_path(java_home: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        java_home.join("bin").join("java.exe")
    }

    #[cfg(not(target_os = "windows"))]
    {
        java_home.join("bin").join("java")
    }
}

/// Check whether a directory is absent or has no entries.
pub fn is_missing_or_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => !dir.exists(),
    }
}
