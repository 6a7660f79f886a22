//! One server process and the on-disk state it runs from.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::types::StatusCell;
use super::{Endpoints, InstanceStatus, ServerFamily, Setting};
use crate::backup::{extract_backup_data, read_backup_metadata, write_backup_archive, BackupMetadata};
use crate::config::ManagerConfig;
use crate::config_editor::ConfigEditor;
use crate::error::{ManagerError, Result};
use crate::mirror::mirror;
use crate::paths::instance_conf_dir;
use crate::platform::HostOs;
use crate::process::{configure_command, forward_output, terminate};
use crate::runtime::RuntimeResolver;
use crate::validation::validate_config_file_name;
use crate::versions::Neo4jVersion;

#[derive(Debug)]
struct RunningProcess {
    child: Child,
    pid: u32,
}

#[derive(Debug)]
enum ProcessState {
    NoProcess,
    Running(RunningProcess),
    Exited(Option<ExitStatus>),
}

#[derive(Debug, Clone, Copy)]
struct Timings {
    startup_timeout: Duration,
    readiness_interval: Duration,
    stop_grace: Duration,
}

/// Drives one instance through `Stopped -> Starting -> Started -> Stopping`.
///
/// Callers serialize access through the pool's per-instance lock; the status
/// itself lives in a shared [`StatusCell`] so snapshots never wait on that lock.
#[derive(Debug)]
pub(crate) struct InstanceProvider {
    id: String,
    home: PathBuf,
    version: Neo4jVersion,
    family: ServerFamily,
    endpoints: Endpoints,
    status: Arc<StatusCell>,
    runtime: RuntimeResolver,
    client: Client,
    timings: Timings,
    process: ProcessState,
}

impl InstanceProvider {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: &str,
        home: PathBuf,
        version: Neo4jVersion,
        family: ServerFamily,
        endpoints: Endpoints,
        status: Arc<StatusCell>,
        config: &ManagerConfig,
        client: Client,
    ) -> Self {
        Self {
            id: id.to_string(),
            home,
            version,
            family,
            endpoints,
            status,
            runtime: RuntimeResolver::new(config),
            client,
            timings: Timings {
                startup_timeout: config.startup_timeout(),
                readiness_interval: config.readiness_interval(),
                stop_grace: config.stop_grace_period(),
            },
            process: ProcessState::NoProcess,
        }
    }

    fn main_config(&self) -> ConfigEditor {
        ConfigEditor::new(instance_conf_dir(&self.home).join(self.family.config_file()))
    }

    /// Data directory as currently configured.
    pub(crate) fn data_path(&self) -> Result<PathBuf> {
        self.family.data_path(&self.home, &self.main_config())
    }

    /// Observe whether the process is still alive, recording an exit.
    fn refresh(&mut self) -> bool {
        let ProcessState::Running(running) = &mut self.process else {
            return false;
        };
        match running.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::info!(
                    "Instance {} process {} exited with {}",
                    self.id,
                    running.pid,
                    status
                );
                self.process = ProcessState::Exited(Some(status));
                false
            }
            Err(e) => {
                log::warn!("Failed to poll instance {} process: {}", self.id, e);
                true
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pid(&self) -> Option<u32> {
        match &self.process {
            ProcessState::Running(running) => Some(running.pid),
            _ => None,
        }
    }

    /// Move to `Stopped` if the process died on its own. Returns whether it did.
    pub(crate) fn reap_exited(&mut self) -> bool {
        let was_tracked = matches!(self.process, ProcessState::Running(_));
        if !was_tracked || self.refresh() {
            return false;
        }
        log::warn!("Instance {} stopped unexpectedly", self.id);
        self.status.set(InstanceStatus::Stopped);
        true
    }

    /// Bind a freshly populated home to its ports and create the data directory.
    pub(crate) fn prepare_home(&self) -> Result<()> {
        self.apply_endpoint_settings()?;
        let data = self.data_path()?;
        std::fs::create_dir_all(&data)
            .map_err(|e| ManagerError::io(format!("Failed to create data directory {data:?}: {e}")))
    }

    fn apply_endpoint_settings(&self) -> Result<()> {
        let editor = self.main_config();
        for (key, value) in self.family.endpoint_settings(&self.endpoints) {
            editor
                .set_value(key, &value)
                .map_err(|e| ManagerError::config_write(e.to_string()))?;
        }
        Ok(())
    }

    fn spawn(&mut self) -> Result<()> {
        self.apply_endpoint_settings()?;
        let java = self.runtime.resolve(self.family.java_major())?;

        let mut cmd = Command::new(&java);
        cmd.args(
            self.family
                .launch_args(&self.home, self.version.edition, HostOs::current()),
        )
        .current_dir(&self.home);
        configure_command(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            ManagerError::process(format!("Failed to start {:?} for {}: {}", java, self.id, e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| ManagerError::process("Failed to get process ID"))?;
        forward_output(&self.id, &mut child);

        log::info!(
            "Instance {} spawned (pid: {}, bolt: {}, http: {})",
            self.id,
            pid,
            self.endpoints.bolt_port,
            self.endpoints.http_port
        );
        self.process = ProcessState::Running(RunningProcess { child, pid });
        self.status.set(InstanceStatus::Starting);
        Ok(())
    }

    /// Start the server and wait until it is ready.
    ///
    /// Cancellation leaves the process running in `Starting`; the next start
    /// resumes waiting for it.
    pub(crate) async fn start(&mut self, token: &CancellationToken) -> Result<()> {
        if self.refresh() {
            if self.status.get() == InstanceStatus::Started {
                return Ok(());
            }
            log::info!("Instance {} is still starting, waiting for readiness", self.id);
            self.status.set(InstanceStatus::Starting);
        } else {
            if token.is_cancelled() {
                return Err(ManagerError::cancelled());
            }
            if let Err(e) = self.spawn() {
                self.status.set(InstanceStatus::Stopped);
                return Err(e);
            }
        }
        self.wait_until_ready(token).await
    }

    async fn wait_until_ready(&mut self, token: &CancellationToken) -> Result<()> {
        let probe = self.family.readiness_probe(&self.endpoints);
        let deadline = tokio::time::Instant::now() + self.timings.startup_timeout;

        loop {
            if !self.refresh() {
                self.status.set(InstanceStatus::Stopped);
                let detail = match &self.process {
                    ProcessState::Exited(Some(status)) => format!("exited with {status}"),
                    _ => "exited".to_string(),
                };
                return Err(ManagerError::process(format!(
                    "Instance {} process {} before becoming ready",
                    self.id, detail
                )));
            }

            if probe.check(&self.client).await {
                self.status.set(InstanceStatus::Started);
                log::info!("Instance {} started", self.id);
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                log::warn!(
                    "Instance {} not ready after {}s, killing it",
                    self.id,
                    self.timings.startup_timeout.as_secs()
                );
                self.kill_process(Duration::ZERO).await;
                self.status.set(InstanceStatus::Stopped);
                return Err(ManagerError::startup_timeout(
                    &self.id,
                    self.timings.startup_timeout.as_secs(),
                ));
            }

            tokio::select! {
                () = token.cancelled() => return Err(ManagerError::cancelled()),
                () = tokio::time::sleep(self.timings.readiness_interval) => {}
            }
        }
    }

    async fn kill_process(&mut self, grace: Duration) {
        if let ProcessState::Running(mut running) =
            std::mem::replace(&mut self.process, ProcessState::NoProcess)
        {
            let status = terminate(&mut running.child, grace).await;
            log::info!(
                "Instance {} process {} terminated ({:?})",
                self.id,
                running.pid,
                status
            );
            self.process = ProcessState::Exited(status);
        }
    }

    /// Stop the server. Never fails; the instance always ends `Stopped`.
    pub(crate) async fn stop(&mut self) {
        if self.refresh() {
            self.status.set(InstanceStatus::Stopping);
            self.kill_process(self.timings.stop_grace).await;
            log::info!("Instance {} stopped", self.id);
        }
        self.status.set(InstanceStatus::Stopped);
    }

    pub(crate) async fn restart(&mut self, token: &CancellationToken) -> Result<()> {
        self.stop().await;
        self.start(token).await
    }

    /// Write one setting. Takes effect on the next start.
    pub(crate) fn configure(&self, setting: &Setting) -> Result<()> {
        validate_config_file_name(&setting.config_file)?;
        ConfigEditor::new(instance_conf_dir(&self.home).join(&setting.config_file))
            .set_value(&setting.key, &setting.value)
            .map_err(|e| ManagerError::config_write(e.to_string()))
    }

    pub(crate) fn setting(&self, config_file: &str, key: &str) -> Result<Option<String>> {
        validate_config_file_name(config_file)?;
        ConfigEditor::new(instance_conf_dir(&self.home).join(config_file)).get_value(key)
    }

    /// Empty the data directory, restarting the server only if it was running.
    ///
    /// The token is honoured only before anything changes. Once the server is
    /// stopped the clear runs to completion and the prior running state comes
    /// back regardless of cancellation.
    pub(crate) async fn clear(&mut self, token: &CancellationToken) -> Result<()> {
        let data = self.data_path()?;
        if token.is_cancelled() {
            return Err(ManagerError::cancelled());
        }
        let was_running = self.refresh();
        self.stop().await;

        let target = data.clone();
        tokio::task::spawn_blocking(move || recreate_empty_dir(&target))
            .await
            .map_err(|e| ManagerError::io(format!("Clear task failed: {e}")))??;
        log::info!("Instance {} data cleared at {:?}", self.id, data);

        if was_running {
            self.start(&CancellationToken::new()).await?;
        }
        Ok(())
    }

    /// Stop first when asked and currently running; returns whether it stopped.
    async fn pause_for_backup(&mut self, stop_before: bool) -> bool {
        if stop_before && self.refresh() {
            self.stop().await;
            true
        } else {
            false
        }
    }

    /// Restart after a backup this call paused, keeping the first failure.
    ///
    /// The restart does not observe the caller's token: a cancelled backup
    /// still hands the instance back running.
    async fn resume_after_backup(&mut self, stopped: bool, outcome: Result<()>) -> Result<()> {
        if !stopped {
            return outcome;
        }
        match (outcome, self.start(&CancellationToken::new()).await) {
            (Ok(()), restart) => restart,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restart_err)) => {
                log::error!(
                    "Instance {} failed to restart after backup: {}",
                    self.id,
                    restart_err
                );
                Err(e)
            }
        }
    }

    /// Mirror the data directory to `destination`.
    pub(crate) async fn backup(
        &mut self,
        destination: &Path,
        stop_before: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let data = self.data_path()?;
        if token.is_cancelled() {
            return Err(ManagerError::cancelled());
        }
        let stopped = self.pause_for_backup(stop_before).await;
        let outcome = mirror(&data, destination, token).await;
        if outcome.is_ok() {
            log::info!("Instance {} backed up to {:?}", self.id, destination);
        }
        self.resume_after_backup(stopped, outcome).await
    }

    /// Replace the data directory with `source`, then start.
    pub(crate) async fn restore(&mut self, source: &Path, token: &CancellationToken) -> Result<()> {
        let data = self.data_path()?;
        if token.is_cancelled() {
            return Err(ManagerError::cancelled());
        }
        self.stop().await;
        mirror(source, &data, token).await?;
        log::info!("Instance {} restored from {:?}", self.id, source);
        self.start(token).await
    }

    /// Write the data directory to a zip archive with metadata.
    pub(crate) async fn backup_archive(
        &mut self,
        destination: &Path,
        stop_before: bool,
        token: &CancellationToken,
    ) -> Result<BackupMetadata> {
        let data = self.data_path()?;
        let metadata = BackupMetadata::new(
            &self.id,
            &self.version.version,
            self.version.edition,
            self.family,
        );
        if token.is_cancelled() {
            return Err(ManagerError::cancelled());
        }
        let stopped = self.pause_for_backup(stop_before).await;

        let outcome = if token.is_cancelled() {
            Err(ManagerError::cancelled())
        } else {
            let dest = destination.to_path_buf();
            let meta = metadata.clone();
            tokio::task::spawn_blocking(move || write_backup_archive(&data, &dest, &meta))
                .await
                .map_err(|e| ManagerError::backup(format!("Backup task failed: {e}")))
                .and_then(|result| result)
        };
        if outcome.is_ok() {
            log::info!("Instance {} archived to {:?}", self.id, destination);
        }

        self.resume_after_backup(stopped, outcome).await?;
        Ok(metadata)
    }

    /// Restore from a zip archive made by [`Self::backup_archive`], then start.
    ///
    /// Archives from another server family are refused before anything stops.
    pub(crate) async fn restore_archive(
        &mut self,
        source: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        let data = self.data_path()?;
        let archive = source.to_path_buf();
        let metadata = tokio::task::spawn_blocking(move || read_backup_metadata(&archive))
            .await
            .map_err(|e| ManagerError::backup(format!("Backup task failed: {e}")))??;
        if metadata.family != self.family {
            return Err(ManagerError::backup_family_mismatch(
                metadata.family.as_str(),
                self.family.as_str(),
            ));
        }

        if token.is_cancelled() {
            return Err(ManagerError::cancelled());
        }
        self.stop().await;
        let archive = source.to_path_buf();
        tokio::task::spawn_blocking(move || extract_backup_data(&archive, &data))
            .await
            .map_err(|e| ManagerError::backup(format!("Restore task failed: {e}")))??;
        log::info!(
            "Instance {} restored from archive of {} ({})",
            self.id,
            metadata.instance_id,
            metadata.created_at
        );
        self.start(token).await
    }
}

fn recreate_empty_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ManagerError::io(format!(
                "Failed to remove data directory {dir:?}: {e}"
            )))
        }
    }
    std::fs::create_dir_all(dir)
        .map_err(|e| ManagerError::io(format!("Failed to create data directory {dir:?}: {e}")))
}

#[cfg(all(test, unix))]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::fs;

    use tokio::sync::broadcast;

    use super::*;
    use crate::mirror::mirror_blocking;
    use crate::paths::distribution_tree;
    use crate::test_support::{
        fake_java_home, seed_distribution, serve_http_ok, test_config, unused_port, version,
    };

    struct Fixture {
        dir: tempfile::TempDir,
        provider: InstanceProvider,
        status: Arc<StatusCell>,
        http_port: u16,
    }

    /// Provider for a seeded 3.2.3 home whose `java` runs `script`.
    fn fixture(script: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.java_home = Some(fake_java_home(dir.path(), script));
        config.startup_timeout_secs = 3;

        let version = version(3, 2, 3);
        seed_distribution(&config, &version);
        let home = config.base_path.join("a");
        let tree = distribution_tree(&config.distributions_path.join(version.distribution_key()));
        mirror_blocking(&tree, &home, &CancellationToken::new()).unwrap();

        let endpoints = Endpoints {
            bolt_port: unused_port(),
            http_port: unused_port(),
        };
        let (tx, _) = broadcast::channel(16);
        let status = Arc::new(StatusCell::new("a", tx));
        let provider = InstanceProvider::new(
            "a",
            home,
            version,
            ServerFamily::V3,
            endpoints,
            Arc::clone(&status),
            &config,
            Client::new(),
        );
        Fixture {
            dir,
            provider,
            status,
            http_port: endpoints.http_port,
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        let token = CancellationToken::new();

        f.provider.start(&token).await.unwrap();
        assert_eq!(f.status.get(), InstanceStatus::Started);
        f.provider.start(&token).await.unwrap();
        assert_eq!(f.status.get(), InstanceStatus::Started);

        f.provider.stop().await;
        assert_eq!(f.status.get(), InstanceStatus::Stopped);
        f.provider.stop().await;
        assert_eq!(f.status.get(), InstanceStatus::Stopped);
        server.abort();
    }

    #[tokio::test]
    async fn start_writes_endpoint_settings() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;

        f.provider.start(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            f.provider
                .setting("neo4j.conf", "dbms.connector.http.listen_address")
                .unwrap(),
            Some(format!(":{}", f.http_port))
        );
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn process_exit_during_startup_is_reported() {
        let mut f = fixture("exit 1");

        let err = f.provider.start(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Process);
        assert_eq!(f.status.get(), InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn never_ready_server_times_out_and_is_killed() {
        let mut f = fixture("exec sleep 30");

        let err = f.provider.start(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::StartupTimeout);
        assert_eq!(f.status.get(), InstanceStatus::Stopped);
        assert!(!f.provider.refresh());
    }

    #[tokio::test]
    async fn cancelled_start_leaves_process_starting_and_resumes() {
        let mut f = fixture("exec sleep 30");
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });

        let err = f.provider.start(&token).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        assert_eq!(f.status.get(), InstanceStatus::Starting);
        assert!(f.provider.refresh());

        let server = serve_http_ok(f.http_port).await;
        f.provider.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(f.status.get(), InstanceStatus::Started);
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn missing_runtime_prevents_spawn() {
        let mut f = fixture("exec sleep 30");
        f.provider.runtime = RuntimeResolver::new(&ManagerConfig {
            java_home: Some(PathBuf::from("/nonexistent/java")),
            ..ManagerConfig::default()
        });

        let err = f.provider.start(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::RuntimeNotFound);
        assert_eq!(f.status.get(), InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn clear_empties_data_and_keeps_stopped_state() {
        let mut f = fixture("exec sleep 30");
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(data.join("schema")).unwrap();
        fs::write(data.join("neostore"), "nodes").unwrap();

        f.provider.clear(&CancellationToken::new()).await.unwrap();

        assert!(data.is_dir());
        assert_eq!(fs::read_dir(&data).unwrap().count(), 0);
        assert_eq!(f.status.get(), InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn clear_restarts_a_running_instance() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        let token = CancellationToken::new();
        f.provider.start(&token).await.unwrap();
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("neostore"), "nodes").unwrap();

        f.provider.clear(&token).await.unwrap();

        assert!(!data.join("neostore").exists());
        assert_eq!(f.status.get(), InstanceStatus::Started);
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn backup_then_restore_brings_back_the_data() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        let token = CancellationToken::new();
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("neostore"), "v1").unwrap();
        f.provider.start(&token).await.unwrap();

        let backup_dir = f.dir.path().join("backup");
        f.provider.backup(&backup_dir, true, &token).await.unwrap();
        assert_eq!(f.status.get(), InstanceStatus::Started);
        assert_eq!(fs::read_to_string(backup_dir.join("neostore")).unwrap(), "v1");

        fs::write(data.join("neostore"), "v2").unwrap();
        f.provider.restore(&backup_dir, &token).await.unwrap();

        assert_eq!(fs::read_to_string(data.join("neostore")).unwrap(), "v1");
        assert_eq!(f.status.get(), InstanceStatus::Started);
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn backup_of_a_stopped_instance_does_not_start_it() {
        let mut f = fixture("exec sleep 30");
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(&data).unwrap();

        f.provider
            .backup(&f.dir.path().join("backup"), true, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(f.status.get(), InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn failed_restore_leaves_instance_stopped() {
        let mut f = fixture("exec sleep 30");

        let err = f
            .provider
            .restore(&f.dir.path().join("absent"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert_eq!(f.status.get(), InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn archive_backup_restores_and_rejects_other_families() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        let token = CancellationToken::new();
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("neostore"), "v1").unwrap();

        let archive = f.dir.path().join("a.zip");
        let metadata = f.provider.backup_archive(&archive, true, &token).await.unwrap();
        assert_eq!(metadata.family, ServerFamily::V3);

        fs::write(data.join("neostore"), "v2").unwrap();
        f.provider.restore_archive(&archive, &token).await.unwrap();
        assert_eq!(fs::read_to_string(data.join("neostore")).unwrap(), "v1");
        assert_eq!(f.status.get(), InstanceStatus::Started);

        f.provider.family = ServerFamily::V2;
        let err = f.provider.restore_archive(&archive, &token).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Backup);
        assert_eq!(f.status.get(), InstanceStatus::Started);

        f.provider.stop().await;
        server.abort();
    }

    /// Every file under `dir` with its contents, sorted by relative path.
    fn tree_snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut entries: Vec<(PathBuf, Vec<u8>)> = walkdir::WalkDir::new(dir)
            .into_iter()
            .map(|entry| entry.unwrap())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                let relative = entry.path().strip_prefix(dir).unwrap().to_path_buf();
                (relative, fs::read(entry.path()).unwrap())
            })
            .collect();
        entries.sort();
        entries
    }

    fn cancelled_token() -> CancellationToken {
        let token = CancellationToken::new();
        token.cancel();
        token
    }

    /// Cancel `token` shortly after the caller starts stopping the server.
    fn cancel_soon(token: &CancellationToken) {
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    #[tokio::test]
    async fn backup_clear_restore_round_trips_a_nested_tree() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        let token = CancellationToken::new();
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(data.join("schema").join("index").join("lucene")).unwrap();
        fs::write(data.join("neostore"), b"\x00\x01store").unwrap();
        fs::write(data.join("schema").join("index").join("lucene").join("1"), "segment").unwrap();
        fs::write(data.join("neostore.nodestore.db"), vec![7u8; 4096]).unwrap();
        let before = tree_snapshot(&data);
        f.provider.start(&token).await.unwrap();

        let backup_dir = f.dir.path().join("backup");
        f.provider.backup(&backup_dir, true, &token).await.unwrap();
        f.provider.clear(&token).await.unwrap();
        assert!(tree_snapshot(&data).is_empty());
        assert_eq!(f.status.get(), InstanceStatus::Started);

        f.provider.restore(&backup_dir, &token).await.unwrap();

        assert_eq!(tree_snapshot(&data), before);
        assert_eq!(f.status.get(), InstanceStatus::Started);
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn cancelled_backup_leaves_running_instance_alone() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        f.provider.start(&CancellationToken::new()).await.unwrap();
        let backup_dir = f.dir.path().join("backup");

        let err = f
            .provider
            .backup(&backup_dir, true, &cancelled_token())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        let err = f
            .provider
            .backup_archive(&f.dir.path().join("a.zip"), true, &cancelled_token())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);

        assert_eq!(f.status.get(), InstanceStatus::Started);
        assert!(f.provider.refresh());
        assert!(!backup_dir.exists());
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn backup_cancelled_while_stopping_restarts_the_instance() {
        let mut f = fixture("trap '' TERM; exec sleep 30");
        f.provider.timings.stop_grace = Duration::from_millis(500);
        let server = serve_http_ok(f.http_port).await;
        fs::create_dir_all(f.provider.data_path().unwrap()).unwrap();
        f.provider.start(&CancellationToken::new()).await.unwrap();

        let token = CancellationToken::new();
        cancel_soon(&token);
        let err = f
            .provider
            .backup(&f.dir.path().join("backup"), true, &token)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        assert_eq!(f.status.get(), InstanceStatus::Started);
        assert!(f.provider.refresh());

        let token = CancellationToken::new();
        cancel_soon(&token);
        let err = f
            .provider
            .backup_archive(&f.dir.path().join("a.zip"), true, &token)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        assert_eq!(f.status.get(), InstanceStatus::Started);
        assert!(f.provider.refresh());
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn failed_backup_still_restarts_the_instance() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        let token = CancellationToken::new();
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(&data).unwrap();
        f.provider.start(&token).await.unwrap();
        let inside_data = data.join("backup");

        let err = f.provider.backup(&inside_data, true, &token).await.unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert_eq!(f.status.get(), InstanceStatus::Started);
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn cancelled_clear_keeps_data_and_process() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        f.provider.start(&CancellationToken::new()).await.unwrap();
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("neostore"), "nodes").unwrap();

        let err = f.provider.clear(&cancelled_token()).await.unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        assert_eq!(fs::read_to_string(data.join("neostore")).unwrap(), "nodes");
        assert_eq!(f.status.get(), InstanceStatus::Started);
        assert!(f.provider.refresh());
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn clear_cancelled_while_stopping_completes_and_restarts() {
        let mut f = fixture("trap '' TERM; exec sleep 30");
        f.provider.timings.stop_grace = Duration::from_millis(500);
        let server = serve_http_ok(f.http_port).await;
        f.provider.start(&CancellationToken::new()).await.unwrap();
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("neostore"), "nodes").unwrap();

        let token = CancellationToken::new();
        cancel_soon(&token);
        f.provider.clear(&token).await.unwrap();

        assert!(tree_snapshot(&data).is_empty());
        assert_eq!(f.status.get(), InstanceStatus::Started);
        assert!(f.provider.refresh());
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn cancelled_restore_changes_nothing() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        let token = CancellationToken::new();
        let data = f.provider.data_path().unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("neostore"), "v1").unwrap();
        let backup_dir = f.dir.path().join("backup");
        f.provider.backup(&backup_dir, false, &token).await.unwrap();
        let archive = f.dir.path().join("a.zip");
        f.provider.backup_archive(&archive, false, &token).await.unwrap();
        f.provider.start(&token).await.unwrap();
        fs::write(data.join("neostore"), "v2").unwrap();

        let err = f
            .provider
            .restore(&backup_dir, &cancelled_token())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        let err = f
            .provider
            .restore_archive(&archive, &cancelled_token())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);

        assert_eq!(fs::read_to_string(data.join("neostore")).unwrap(), "v2");
        assert_eq!(f.status.get(), InstanceStatus::Started);
        assert!(f.provider.refresh());
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn configure_persists_across_restart() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        let token = CancellationToken::new();
        f.provider.start(&token).await.unwrap();

        f.provider
            .configure(&Setting::new("neo4j.conf", "dbms.security.auth_enabled", "false"))
            .unwrap();
        f.provider.restart(&token).await.unwrap();

        assert_eq!(
            f.provider
                .setting("neo4j.conf", "dbms.security.auth_enabled")
                .unwrap()
                .as_deref(),
            Some("false")
        );
        assert_eq!(f.status.get(), InstanceStatus::Started);
        f.provider.stop().await;
        server.abort();
    }

    #[tokio::test]
    async fn configure_rejects_paths_outside_conf() {
        let f = fixture("exec sleep 30");
        let err = f
            .provider
            .configure(&Setting::new("../neo4j.conf", "a", "b"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConfigWrite);
    }

    #[tokio::test]
    async fn exited_process_is_reaped() {
        let mut f = fixture("exec sleep 30");
        let server = serve_http_ok(f.http_port).await;
        f.provider.start(&CancellationToken::new()).await.unwrap();

        if let ProcessState::Running(running) = &mut f.provider.process {
            running.child.kill().await.unwrap();
        }

        assert!(f.provider.reap_exited());
        assert_eq!(f.status.get(), InstanceStatus::Stopped);
        assert!(!f.provider.reap_exited());
        server.abort();
    }
}
