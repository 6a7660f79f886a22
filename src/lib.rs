//! Provisioning and supervision of local Neo4j server instances.
//!
//! [`InstancePool`] is the entry point: it creates instances from a
//! [`Neo4jVersion`], hands out ports, and serializes start/stop/backup/restore
//! per instance while letting different instances proceed in parallel.

mod archive;
pub mod backup;
pub mod config;
pub mod config_editor;
pub mod distribution;
pub mod download;
mod error;
pub mod instance;
pub mod mirror;
pub mod paths;
pub mod platform;
pub mod process;
pub mod runtime;
mod validation;
pub mod versions;

#[cfg(test)]
mod test_support;

pub use backup::BackupMetadata;
pub use config::{load_config, save_config, ManagerConfig};
pub use error::{ErrorKind, ManagerError, Result};
pub use instance::{
    Endpoints, InstanceEvent, InstanceEventKind, InstanceFactory, InstanceInfo, InstancePool,
    InstanceStatus, ServerFamily, Setting,
};
pub use versions::{Edition, Neo4jVersion, VersionCatalog};
