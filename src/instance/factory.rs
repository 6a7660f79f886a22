//! Builds providers for new instances.

use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::provider::InstanceProvider;
use super::types::StatusCell;
use super::{Endpoints, ServerFamily};
use crate::config::ManagerConfig;
use crate::distribution::DistributionStore;
use crate::error::Result;
use crate::mirror::mirror;
use crate::versions::Neo4jVersion;

/// Picks the server family for a version and populates instance homes.
#[derive(Debug)]
pub struct InstanceFactory {
    config: Arc<ManagerConfig>,
    distributions: DistributionStore,
    client: Client,
}

impl InstanceFactory {
    pub fn new(config: Arc<ManagerConfig>, client: Client) -> Self {
        let distributions = DistributionStore::new(&config, client.clone());
        Self {
            config,
            distributions,
            client,
        }
    }

    pub fn distributions(&self) -> &DistributionStore {
        &self.distributions
    }

    /// Server family for `version`, or `UnsupportedVersion`.
    pub fn family_for(&self, version: &Neo4jVersion) -> Result<ServerFamily> {
        ServerFamily::for_version(&version.version)
    }

    /// Populate `home` from the distribution and return a stopped provider.
    ///
    /// On error `home` may be partially written; the caller removes it.
    pub(crate) async fn provision(
        &self,
        id: &str,
        version: &Neo4jVersion,
        endpoints: Endpoints,
        home: &Path,
        status: Arc<StatusCell>,
        token: &CancellationToken,
    ) -> Result<InstanceProvider> {
        let family = self.family_for(version)?;
        let tree = self.distributions.ensure(version, token).await?;
        mirror(&tree, home, token).await?;

        let provider = InstanceProvider::new(
            id,
            home.to_path_buf(),
            version.clone(),
            family,
            endpoints,
            status,
            &self.config,
            self.client.clone(),
        );
        provider.prepare_home()?;
        log::info!(
            "Provisioned instance {} ({}, family {}) at {:?}",
            id,
            version,
            family,
            home
        );
        Ok(provider)
    }
}
