//! Conventions that differ between server generations.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::Endpoints;
use crate::config_editor::ConfigEditor;
use crate::error::{ManagerError, Result};
use crate::platform::HostOs;
use crate::process::ReadinessProbe;
use crate::versions::Edition;

/// Server generation, selected once per instance from its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerFamily {
    /// `>=2.0.0, <3.0.0`
    V2,
    /// `>=3.0.0, <4.0.0`
    V3,
}

impl ServerFamily {
    pub fn for_version(version: &semver::Version) -> Result<Self> {
        match version.major {
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            _ => Err(ManagerError::unsupported_version(&version.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V3 => "v3",
        }
    }

    pub fn java_major(self) -> u32 {
        8
    }

    /// Main config file, relative to the conf directory.
    pub fn config_file(self) -> &'static str {
        match self {
            Self::V2 => "neo4j-server.properties",
            Self::V3 => "neo4j.conf",
        }
    }

    /// Data directory of the active database, resolved against `home`.
    pub fn data_path(self, home: &Path, config: &ConfigEditor) -> Result<PathBuf> {
        match self {
            Self::V2 => {
                let location = non_empty(config.get_value("org.neo4j.server.database.location")?)
                    .unwrap_or_else(|| "data/graph.db".to_string());
                Ok(home.join(location))
            }
            Self::V3 => {
                let data = non_empty(config.get_value("dbms.directories.data")?)
                    .unwrap_or_else(|| "data/databases".to_string());
                let database = non_empty(config.get_value("dbms.active_database")?)
                    .unwrap_or_else(|| "graph.db".to_string());
                Ok(home.join(data).join(database))
            }
        }
    }

    /// Settings that bind the server to its allocated ports.
    pub fn endpoint_settings(self, endpoints: &Endpoints) -> Vec<(&'static str, String)> {
        match self {
            // 2.x has no bolt connector; the bolt port stays reserved.
            Self::V2 => vec![
                (
                    "org.neo4j.server.webserver.port",
                    endpoints.http_port.to_string(),
                ),
                ("org.neo4j.server.webserver.https.enabled", "false".to_string()),
            ],
            Self::V3 => vec![
                (
                    "dbms.connector.bolt.listen_address",
                    format!(":{}", endpoints.bolt_port),
                ),
                (
                    "dbms.connector.http.listen_address",
                    format!(":{}", endpoints.http_port),
                ),
                ("dbms.connector.https.enabled", "false".to_string()),
            ],
        }
    }

    /// Arguments passed to `java` to run the server in the foreground.
    pub fn launch_args(self, home: &Path, edition: Edition, os: HostOs) -> Vec<String> {
        let home_str = home.to_string_lossy();
        let conf = home.join("conf");
        let conf_str = conf.to_string_lossy();
        let sep = os.classpath_separator();

        match self {
            Self::V2 => {
                let main_class = match edition {
                    Edition::Community => "org.neo4j.server.CommunityBootstrapper",
                    Edition::Enterprise => "org.neo4j.server.enterprise.EnterpriseBootstrapper",
                };
                vec![
                    "-cp".to_string(),
                    format!(
                        "{}{sep}{}",
                        home.join("lib").join("*").to_string_lossy(),
                        home.join("system").join("lib").join("*").to_string_lossy()
                    ),
                    "-server".to_string(),
                    format!(
                        "-Dorg.neo4j.server.properties={}",
                        conf.join(self.config_file()).to_string_lossy()
                    ),
                    format!(
                        "-Djava.util.logging.config.file={}",
                        conf.join("logging.properties").to_string_lossy()
                    ),
                    format!("-Dneo4j.home={home_str}"),
                    "-Dfile.encoding=UTF-8".to_string(),
                    main_class.to_string(),
                ]
            }
            Self::V3 => {
                let main_class = match edition {
                    Edition::Community => "org.neo4j.server.CommunityEntryPoint",
                    Edition::Enterprise => "org.neo4j.server.enterprise.EnterpriseEntryPoint",
                };
                vec![
                    "-cp".to_string(),
                    format!(
                        "{}{sep}{}",
                        home.join("lib").join("*").to_string_lossy(),
                        home.join("plugins").join("*").to_string_lossy()
                    ),
                    "-server".to_string(),
                    "-Dfile.encoding=UTF-8".to_string(),
                    main_class.to_string(),
                    format!("--home-dir={home_str}"),
                    format!("--config-dir={conf_str}"),
                ]
            }
        }
    }

    pub fn readiness_probe(self, endpoints: &Endpoints) -> ReadinessProbe {
        match self {
            Self::V2 => ReadinessProbe::tcp(endpoints.http_port),
            Self::V3 => ReadinessProbe::http_root(endpoints.http_port),
        }
    }
}

impl fmt::Display for ServerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
