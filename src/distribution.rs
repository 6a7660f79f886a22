//! Local cache of unpacked server distributions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::archive::{extract_tar_gz_flat, extract_zip_flat};
use crate::config::ManagerConfig;
use crate::download::{apply_mirror, download_file};
use crate::error::{ManagerError, Result};
use crate::paths::{distribution_dir, distribution_marker, distribution_tree};
use crate::platform::ArchiveFormat;
use crate::versions::Neo4jVersion;

/// Downloads and unpacks each distribution once, then serves the cached tree.
#[derive(Debug)]
pub struct DistributionStore {
    root: PathBuf,
    mirror: String,
    client: Client,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DistributionStore {
    pub fn new(config: &ManagerConfig, client: Client) -> Self {
        Self {
            root: config.distributions_path.clone(),
            mirror: config.download_mirror.clone(),
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the distribution for `version` is already unpacked.
    pub fn is_installed(&self, version: &Neo4jVersion) -> bool {
        distribution_marker(&distribution_dir(&self.root, &version.distribution_key())).is_file()
    }

    /// Return the unpacked server tree for `version`, fetching it if needed.
    ///
    /// Calls for the same version are serialized; the second caller finds the
    /// marker and returns immediately.
    pub async fn ensure(&self, version: &Neo4jVersion, token: &CancellationToken) -> Result<PathBuf> {
        let key = version.distribution_key();
        let dir = distribution_dir(&self.root, &key);
        let tree = distribution_tree(&dir);

        let lock = self.lock_for(&key);
        let _guard = tokio::select! {
            () = token.cancelled() => return Err(ManagerError::cancelled()),
            guard = lock.lock() => guard,
        };

        if distribution_marker(&dir).is_file() {
            return Ok(tree);
        }

        log::info!("Installing Neo4j {} into {:?}", version, dir);
        let format = ArchiveFormat::from_name(&version.download_url).ok_or_else(|| {
            ManagerError::provisioning(format!(
                "cannot tell the archive format of {}",
                version.download_url
            ))
        })?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ManagerError::io(format!("failed to create {dir:?}: {e}")))?;
        let archive = dir.join(format!("neo4j.{}", format.extension()));
        let url = apply_mirror(&self.mirror, &version.download_url);
        download_file(&self.client, &url, &archive, token).await?;

        let unpack_dir = dir.clone();
        let unpack_archive = archive.clone();
        tokio::task::spawn_blocking(move || unpack(&unpack_archive, &unpack_dir, format))
            .await
            .map_err(|e| ManagerError::io(format!("unpack task failed: {e}")))??;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            log::warn!("Failed to remove downloaded archive {:?}: {}", archive, e);
        }
        log::info!("Installed Neo4j {}", version);
        Ok(tree)
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }
}

fn unpack(archive: &Path, dir: &Path, format: ArchiveFormat) -> Result<()> {
    let tree = distribution_tree(dir);
    if tree.exists() {
        std::fs::remove_dir_all(&tree)
            .map_err(|e| ManagerError::io(format!("failed to clear {tree:?}: {e}")))?;
    }

    match format {
        ArchiveFormat::Zip => extract_zip_flat(archive, &tree),
        ArchiveFormat::TarGz => extract_tar_gz_flat(archive, &tree),
    }?;

    std::fs::write(distribution_marker(dir), chrono::Utc::now().to_rfc3339())
        .map_err(|e| ManagerError::io(format!("failed to mark {dir:?} installed: {e}")))
}
