//! Static catalog of the server versions the manager can provision.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, Result};

const EMBEDDED_CATALOG: &str = include_str!("../resources/versions.json");

/// Distribution family tag of a server build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edition {
    Community,
    Enterprise,
}

impl Edition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Community => "community",
            Self::Enterprise => "enterprise",
        }
    }
}

/// One entry of the version catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neo4jVersion {
    pub version: semver::Version,
    pub edition: Edition,
    pub download_url: String,
}

impl Neo4jVersion {
    /// Key used for the distribution cache directory, e.g. `community-3.2.3`.
    pub fn distribution_key(&self) -> String {
        format!("{}-{}", self.edition.as_str(), self.version)
    }
}

impl fmt::Display for Neo4jVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.edition.as_str())
    }
}

/// Parse a user-supplied version string, tolerating a leading `v`.
pub fn parse_version(raw: &str) -> Result<semver::Version> {
    let trimmed = raw.trim();
    semver::Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed))
        .map_err(|e| ManagerError::unsupported_version(&format!("{raw}: {e}")))
}

/// Read-only list of known versions, newest first.
#[derive(Debug, Clone)]
pub struct VersionCatalog {
    versions: Vec<Neo4jVersion>,
}

impl VersionCatalog {
    /// Load from `path`, or from the catalog compiled into the crate when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                ManagerError::config(format!("Failed to read version catalog {path:?}: {e}"))
            })?,
            None => EMBEDDED_CATALOG.to_string(),
        };
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut versions: Vec<Neo4jVersion> = serde_json::from_str(content)?;
        sort_versions_newest_first(&mut versions);
        Ok(Self { versions })
    }

    pub fn list(&self) -> &[Neo4jVersion] {
        &self.versions
    }

    /// Find a version, preferring the community build when no edition is given.
    pub fn find(&self, version: &str, edition: Option<Edition>) -> Result<&Neo4jVersion> {
        let wanted = parse_version(version)?;
        let edition = edition.unwrap_or(Edition::Community);
        self.versions
            .iter()
            .find(|v| v.version == wanted && v.edition == edition)
            .ok_or_else(|| ManagerError::unsupported_version(version))
    }
}

fn sort_versions_newest_first(versions: &mut [Neo4jVersion]) {
    versions.sort_by(|a, b| match b.version.cmp(&a.version) {
        Ordering::Equal => a.edition.as_str().cmp(b.edition.as_str()),
        other => other,
    });
}
