//! The set of managed instances keyed by id.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::factory::InstanceFactory;
use super::provider::InstanceProvider;
use super::types::StatusCell;
use super::{
    Endpoints, InstanceEvent, InstanceEventKind, InstanceInfo, ServerFamily, Setting,
};
use crate::backup::BackupMetadata;
use crate::config::ManagerConfig;
use crate::config_editor::ConfigEditor;
use crate::error::{ErrorKind, ManagerError, Result};
use crate::paths::{instance_conf_dir, instance_home, is_missing_or_empty};
use crate::validation::validate_instance_id;
use crate::versions::{Neo4jVersion, VersionCatalog};

const EVENT_CAPACITY: usize = 128;

/// Ids and ports currently taken, by live instances or in-flight creates.
#[derive(Debug, Default)]
struct Allocator {
    reserved_ids: HashSet<String>,
    used_ports: HashSet<u16>,
}

impl Allocator {
    fn lowest_free(&self, start: u16) -> Option<u16> {
        (start..=u16::MAX).find(|port| !self.used_ports.contains(port))
    }

    /// Reserve `id` and a bolt/http port pair in one step.
    fn reserve(&mut self, id: &str, start_bolt: u16, start_http: u16) -> Result<Endpoints> {
        if self.reserved_ids.contains(id) {
            return Err(ManagerError::duplicate_id(id));
        }
        let bolt_port = self
            .lowest_free(start_bolt)
            .ok_or_else(|| ManagerError::provisioning("no free bolt port left"))?;
        self.used_ports.insert(bolt_port);
        let Some(http_port) = self.lowest_free(start_http) else {
            self.used_ports.remove(&bolt_port);
            return Err(ManagerError::provisioning("no free http port left"));
        };
        self.used_ports.insert(http_port);
        self.reserved_ids.insert(id.to_string());
        Ok(Endpoints {
            bolt_port,
            http_port,
        })
    }

    fn release(&mut self, id: &str, endpoints: Endpoints) {
        self.reserved_ids.remove(id);
        self.used_ports.remove(&endpoints.bolt_port);
        self.used_ports.remove(&endpoints.http_port);
    }
}

#[derive(Debug)]
struct ManagedInstance {
    id: String,
    version: Neo4jVersion,
    family: ServerFamily,
    home: PathBuf,
    endpoints: Endpoints,
    status: Arc<StatusCell>,
    provider: Arc<tokio::sync::Mutex<InstanceProvider>>,
}

impl ManagedInstance {
    fn info(&self) -> InstanceInfo {
        let config = ConfigEditor::new(instance_conf_dir(&self.home).join(self.family.config_file()));
        InstanceInfo {
            id: self.id.clone(),
            version: self.version.version.clone(),
            edition: self.version.edition,
            family: self.family,
            home_directory: self.home.clone(),
            data_path: self.family.data_path(&self.home, &config).ok(),
            endpoints: self.endpoints,
            status: self.status.get(),
        }
    }
}

/// Owns every instance and serializes lifecycle operations per instance.
///
/// Operations on different instances run concurrently. Snapshots (`get`,
/// `list`, `endpoints`) never wait for an in-flight lifecycle operation.
#[derive(Debug)]
pub struct InstancePool {
    config: Arc<ManagerConfig>,
    factory: InstanceFactory,
    catalog: VersionCatalog,
    instances: RwLock<HashMap<String, Arc<ManagedInstance>>>,
    allocator: Mutex<Allocator>,
    events: broadcast::Sender<InstanceEvent>,
}

impl InstancePool {
    pub fn new(config: ManagerConfig, catalog: VersionCatalog) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let config = Arc::new(config);
        let factory = InstanceFactory::new(Arc::clone(&config), client);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            factory,
            catalog,
            instances: RwLock::new(HashMap::new()),
            allocator: Mutex::new(Allocator::default()),
            events,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn factory(&self) -> &InstanceFactory {
        &self.factory
    }

    /// Every version this pool can provision, newest first.
    pub fn versions(&self) -> &[Neo4jVersion] {
        self.catalog.list()
    }

    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    fn emit(&self, instance_id: &str, kind: InstanceEventKind) {
        let _ = self.events.send(InstanceEvent {
            instance_id: instance_id.to_string(),
            kind,
        });
    }

    fn reserve(&self, id: &str) -> Result<Endpoints> {
        let mut allocator = self.allocator.lock().unwrap_or_else(|e| e.into_inner());
        allocator.reserve(id, self.config.start_bolt_port, self.config.start_http_port)
    }

    fn release(&self, id: &str, endpoints: Endpoints) {
        let mut allocator = self.allocator.lock().unwrap_or_else(|e| e.into_inner());
        allocator.release(id, endpoints);
    }

    fn lookup(&self, id: &str) -> Result<Arc<ManagedInstance>> {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        instances
            .get(id)
            .cloned()
            .ok_or_else(|| ManagerError::not_found(id))
    }

    fn all_instances(&self) -> Vec<Arc<ManagedInstance>> {
        let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
        instances.values().cloned().collect()
    }

    /// Look up an instance and take its lock, giving up when `token` fires.
    async fn acquire(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<OwnedMutexGuard<InstanceProvider>> {
        let instance = self.lookup(id)?;
        let provider = Arc::clone(&instance.provider);
        tokio::select! {
            () = token.cancelled() => Err(ManagerError::cancelled()),
            guard = provider.lock_owned() => Ok(guard),
        }
    }

    /// Provision a new stopped instance.
    pub async fn create(
        &self,
        version: &Neo4jVersion,
        id: &str,
        token: &CancellationToken,
    ) -> Result<InstanceInfo> {
        validate_instance_id(id)?;
        let family = self.factory.family_for(version)?;
        let endpoints = self.reserve(id)?;

        let home = instance_home(&self.config.base_path, id);
        if !is_missing_or_empty(&home) {
            self.release(id, endpoints);
            return Err(ManagerError::provisioning(format!(
                "home directory {home:?} already exists and is not empty"
            )));
        }

        log::info!(
            "Creating instance {} ({}, bolt: {}, http: {})",
            id,
            version,
            endpoints.bolt_port,
            endpoints.http_port
        );
        let status = Arc::new(StatusCell::new(id, self.events.clone()));
        let provider = match self
            .factory
            .provision(id, version, endpoints, &home, Arc::clone(&status), token)
            .await
        {
            Ok(provider) => provider,
            Err(e) => {
                log::warn!("Creating instance {} failed: {}", id, e);
                remove_home(&home).await.unwrap_or_else(|cleanup| {
                    log::warn!("Failed to remove {:?} after failed create: {}", home, cleanup);
                });
                self.release(id, endpoints);
                return Err(e.into_provisioning());
            }
        };

        let instance = Arc::new(ManagedInstance {
            id: id.to_string(),
            version: version.clone(),
            family,
            home,
            endpoints,
            status,
            provider: Arc::new(tokio::sync::Mutex::new(provider)),
        });
        let info = instance.info();
        {
            let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
            instances.insert(id.to_string(), instance);
        }
        self.emit(id, InstanceEventKind::Created);
        Ok(info)
    }

    /// Stop an instance, remove its home and free its id and ports.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let instance = {
            let mut instances = self.instances.write().unwrap_or_else(|e| e.into_inner());
            instances.remove(id)
        }
        .ok_or_else(|| ManagerError::not_found(id))?;

        {
            let mut provider = instance.provider.lock().await;
            provider.stop().await;
        }

        let removed = remove_home(&instance.home).await;
        if let Err(e) = &removed {
            log::error!("Failed to remove home of instance {}: {}", id, e);
        }
        self.release(id, instance.endpoints);
        self.emit(id, InstanceEventKind::Deleted);
        log::info!("Deleted instance {}", id);
        removed
    }

    /// Delete every instance concurrently, reporting each failure.
    pub async fn delete_all(&self) -> Result<()> {
        let ids: Vec<String> = {
            let instances = self.instances.read().unwrap_or_else(|e| e.into_inner());
            instances.keys().cloned().collect()
        };

        let results = join_all(ids.iter().map(|id| self.delete(id))).await;
        let failures: Vec<(String, ManagerError)> = ids
            .into_iter()
            .zip(results)
            .filter_map(|(id, result)| match result {
                Err(e) if e.kind() != ErrorKind::NotFound => Some((id, e)),
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::delete_all(failures))
        }
    }

    pub fn get(&self, id: &str) -> Result<InstanceInfo> {
        self.lookup(id).map(|instance| instance.info())
    }

    /// Snapshot of every instance, sorted by id.
    pub fn list(&self) -> Vec<InstanceInfo> {
        let mut infos: Vec<InstanceInfo> = self
            .all_instances()
            .iter()
            .map(|instance| instance.info())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn endpoints(&self, id: &str) -> Result<Endpoints> {
        self.lookup(id).map(|instance| instance.endpoints)
    }

    pub async fn start(&self, id: &str, token: &CancellationToken) -> Result<()> {
        let mut provider = self.acquire(id, token).await?;
        provider.start(token).await
    }

    pub async fn stop(&self, id: &str, token: &CancellationToken) -> Result<()> {
        let mut provider = self.acquire(id, token).await?;
        provider.stop().await;
        Ok(())
    }

    pub async fn restart(&self, id: &str, token: &CancellationToken) -> Result<()> {
        let mut provider = self.acquire(id, token).await?;
        provider.restart(token).await
    }

    pub async fn clear(&self, id: &str, token: &CancellationToken) -> Result<()> {
        let mut provider = self.acquire(id, token).await?;
        provider.clear(token).await
    }

    pub async fn backup(
        &self,
        id: &str,
        destination: &Path,
        stop_before: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut provider = self.acquire(id, token).await?;
        provider.backup(destination, stop_before, token).await
    }

    pub async fn restore(&self, id: &str, source: &Path, token: &CancellationToken) -> Result<()> {
        let mut provider = self.acquire(id, token).await?;
        provider.restore(source, token).await
    }

    pub async fn backup_archive(
        &self,
        id: &str,
        destination: &Path,
        stop_before: bool,
        token: &CancellationToken,
    ) -> Result<BackupMetadata> {
        let mut provider = self.acquire(id, token).await?;
        provider.backup_archive(destination, stop_before, token).await
    }

    pub async fn restore_archive(
        &self,
        id: &str,
        source: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut provider = self.acquire(id, token).await?;
        provider.restore_archive(source, token).await
    }

    pub async fn configure(
        &self,
        id: &str,
        setting: &Setting,
        token: &CancellationToken,
    ) -> Result<()> {
        let provider = self.acquire(id, token).await?;
        provider.configure(setting)
    }

    pub async fn setting(
        &self,
        id: &str,
        config_file: &str,
        key: &str,
        token: &CancellationToken,
    ) -> Result<Option<String>> {
        let provider = self.acquire(id, token).await?;
        provider.setting(config_file, key)
    }

    /// Mark idle instances whose process exited on its own as stopped.
    ///
    /// Instances busy with another operation are skipped. Returns the ids reaped.
    pub fn reap_exited(&self) -> Vec<String> {
        self.all_instances()
            .into_iter()
            .filter_map(|instance| {
                let mut provider = instance.provider.try_lock().ok()?;
                provider.reap_exited().then(|| instance.id.clone())
            })
            .collect()
    }

    /// Poll for crashed processes every `monitor_interval` until `token` fires.
    pub fn start_runtime_monitor(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.monitor_interval());
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let reaped = self.reap_exited();
                if !reaped.is_empty() {
                    log::warn!("Instances stopped unexpectedly: {}", reaped.join(", "));
                }
            }
        })
    }

    /// Stop every instance; directories are kept.
    pub async fn shutdown(&self) {
        let instances = self.all_instances();
        log::info!("Stopping {} instances", instances.len());
        join_all(instances.iter().map(|instance| async move {
            let mut provider = instance.provider.lock().await;
            provider.stop().await;
        }))
        .await;
    }
}

async fn remove_home(home: &Path) -> Result<()> {
    let home = home.to_path_buf();
    tokio::task::spawn_blocking(move || match std::fs::remove_dir_all(&home) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ManagerError::io(format!("Failed to remove {home:?}: {e}"))),
    })
    .await
    .map_err(|e| ManagerError::io(format!("Remove task failed: {e}")))?
}
