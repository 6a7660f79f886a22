//! Fixtures shared by unit tests.

#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::paths::{distribution_dir, distribution_marker, distribution_tree, java_exe_path};
use crate::versions::{Edition, Neo4jVersion};

pub(crate) fn unused_port() -> u16 {
    portpicker::pick_unused_port().unwrap()
}

/// Answer every HTTP request on `port` with `200 OK`.
pub(crate) async fn serve_http_ok(port: u16) -> JoinHandle<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    })
}

pub(crate) fn version(major: u64, minor: u64, patch: u64) -> Neo4jVersion {
    Neo4jVersion {
        version: semver::Version::new(major, minor, patch),
        edition: Edition::Community,
        download_url: "https://dist.neo4j.org/unused.tar.gz".to_string(),
    }
}

/// A `java` that ignores its arguments and runs `script` instead.
#[cfg(unix)]
pub(crate) fn fake_java_home(root: &Path, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt as _;

    let home = root.join("java");
    let exe = java_exe_path(&home);
    fs::create_dir_all(exe.parent().unwrap()).unwrap();
    fs::write(&exe, format!("#!/bin/sh\n{script}\n")).unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
    home
}

/// Lay out an installed distribution so no download happens.
pub(crate) fn seed_distribution(config: &ManagerConfig, version: &Neo4jVersion) {
    let dir = distribution_dir(&config.distributions_path, &version.distribution_key());
    let tree = distribution_tree(&dir);
    let conf = tree.join("conf");
    fs::create_dir_all(&conf).unwrap();
    fs::create_dir_all(tree.join("lib")).unwrap();
    fs::write(tree.join("lib").join("neo4j-kernel.jar"), "jar").unwrap();
    if version.version.major == 2 {
        fs::write(
            conf.join("neo4j-server.properties"),
            "org.neo4j.server.database.location=data/graph.db\norg.neo4j.server.webserver.port=7474\n",
        )
        .unwrap();
    } else {
        fs::write(
            conf.join("neo4j.conf"),
            "# Neo4j configuration\n#dbms.active_database=graph.db\ndbms.connector.bolt.listen_address=:7687\n",
        )
        .unwrap();
    }
    fs::write(distribution_marker(&dir), "seeded").unwrap();
}

/// Configuration rooted in `root` with fresh port ranges and short timeouts.
pub(crate) fn test_config(root: &Path) -> ManagerConfig {
    ManagerConfig {
        base_path: root.join("instances"),
        start_bolt_port: unused_port(),
        start_http_port: unused_port(),
        distributions_path: root.join("distributions"),
        runtimes_path: root.join("runtimes"),
        java_home: Some(root.join("no-java")),
        startup_timeout_secs: 10,
        readiness_interval_ms: 50,
        stop_grace_secs: 5,
        monitor_interval_secs: 1,
        ..ManagerConfig::default()
    }
}
