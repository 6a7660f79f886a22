//! Instance-related type definitions.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::ServerFamily;
use crate::versions::Edition;

/// Ports an instance listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoints {
    pub bolt_port: u16,
    pub http_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Started,
    Stopping,
}

/// Read-only snapshot of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub id: String,
    pub version: semver::Version,
    pub edition: Edition,
    pub family: ServerFamily,
    pub home_directory: PathBuf,
    /// Resolved from the config file; `None` when it cannot be read.
    pub data_path: Option<PathBuf>,
    pub endpoints: Endpoints,
    pub status: InstanceStatus,
}

/// One `key=value` line of a named server config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub config_file: String,
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn new(
        config_file: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            config_file: config_file.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "status")]
pub enum InstanceEventKind {
    Created,
    Deleted,
    StatusChanged(InstanceStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceEvent {
    pub instance_id: String,
    pub kind: InstanceEventKind,
}

/// Status of one instance, readable without the instance lock.
///
/// Only the provider holding the instance lock writes it.
#[derive(Debug)]
pub(crate) struct StatusCell {
    instance_id: String,
    status: RwLock<InstanceStatus>,
    events: broadcast::Sender<InstanceEvent>,
}

impl StatusCell {
    pub(crate) fn new(instance_id: &str, events: broadcast::Sender<InstanceEvent>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            status: RwLock::new(InstanceStatus::Stopped),
            events,
        }
    }

    pub(crate) fn get(&self) -> InstanceStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set(&self, status: InstanceStatus) {
        let previous = {
            let mut current = self.status.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, status)
        };
        if previous != status {
            log::debug!(
                "Instance {} status {:?} -> {:?}",
                self.instance_id,
                previous,
                status
            );
            let _ = self.events.send(InstanceEvent {
                instance_id: self.instance_id.clone(),
                kind: InstanceEventKind::StatusChanged(status),
            });
        }
    }
}
