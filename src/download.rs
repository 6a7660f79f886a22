//! Streaming download of distribution archives.

use std::path::{Path, PathBuf};

use futures_util::StreamExt as _;
use reqwest::Client;
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;

use crate::error::{ManagerError, Result};

const USER_AGENT: &str = concat!("neo4j-manager/", env!("CARGO_PKG_VERSION"));

/// Prefix `url` with the configured mirror, if any.
pub fn apply_mirror(mirror: &str, url: &str) -> String {
    let mirror = mirror.trim();
    if mirror.is_empty() || url.starts_with("file://") {
        url.to_string()
    } else {
        format!("{}/{}", mirror.trim_end_matches('/'), url)
    }
}

/// Download `url` to `dest`.
///
/// Bytes go to a uniquely named partial file next to `dest`, renamed into
/// place only after the body was fully received. `file://` URLs are copied
/// from the local file system.
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    token: &CancellationToken,
) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| ManagerError::io(format!("download target {dest:?} has no parent")))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| ManagerError::io(format!("failed to create {parent:?}: {e}")))?;

    let partial = partial_path(dest);
    let result = match url.strip_prefix("file://") {
        Some(local) => copy_local(Path::new(local), &partial).await,
        None => fetch(client, url, &partial, token).await,
    };

    if let Err(e) = result {
        if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
            log::debug!("Failed to remove partial download {:?}: {}", partial, remove_err);
        }
        return Err(e);
    }

    tokio::fs::rename(&partial, dest)
        .await
        .map_err(|e| ManagerError::io(format!("failed to move download to {dest:?}: {e}")))
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");
    dest.with_file_name(format!("{name}.{}.part", uuid::Uuid::new_v4()))
}

async fn copy_local(source: &Path, partial: &Path) -> Result<()> {
    tokio::fs::copy(source, partial)
        .await
        .map(|_| ())
        .map_err(|e| ManagerError::network_with_url(&source.display().to_string(), e.to_string()))
}

async fn fetch(client: &Client, url: &str, partial: &Path, token: &CancellationToken) -> Result<()> {
    log::info!("Downloading {}", url);

    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| ManagerError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(ManagerError::network_with_url(url, resp.status().to_string()));
    }

    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| ManagerError::io(format!("failed to create {partial:?}: {e}")))?;
    let mut stream = resp.bytes_stream();
    let mut received = 0u64;

    loop {
        let chunk = tokio::select! {
            () = token.cancelled() => return Err(ManagerError::cancelled()),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| ManagerError::network_with_url(url, e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ManagerError::io(format!("failed to write {partial:?}: {e}")))?;
        received += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| ManagerError::io(format!("failed to write {partial:?}: {e}")))?;
    log::info!("Downloaded {} ({} bytes)", url, received);
    Ok(())
}
