//! Directory mirroring used by create, backup and restore.
//!
//! A mirror makes the destination an exact copy of the source: the destination
//! is removed first, then every entry of the source is copied.

use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{ManagerError, Result};
use crate::validation::ensure_disjoint;

/// Mirror `source` onto `destination` on the blocking pool.
///
/// On error or cancellation the destination may be partially written and must
/// not be treated as usable.
pub async fn mirror(source: &Path, destination: &Path, token: &CancellationToken) -> Result<()> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    let token = token.clone();
    tokio::task::spawn_blocking(move || mirror_blocking(&source, &destination, &token))
        .await
        .map_err(|e| ManagerError::io(format!("Mirror task failed: {e}")))?
}

/// Blocking implementation of [`mirror`].
pub fn mirror_blocking(source: &Path, destination: &Path, token: &CancellationToken) -> Result<()> {
    if !source.is_dir() {
        return Err(ManagerError::io(format!(
            "Mirror source {source:?} is not a directory"
        )));
    }
    ensure_disjoint(source, destination)?;

    if token.is_cancelled() {
        return Err(ManagerError::cancelled());
    }

    clear_destination(destination)?;

    let mut copied_files = 0usize;
    for entry in WalkDir::new(source) {
        if token.is_cancelled() {
            log::warn!(
                "Mirror {:?} -> {:?} cancelled after {} files, destination is incomplete",
                source,
                destination,
                copied_files
            );
            return Err(ManagerError::cancelled());
        }

        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| ManagerError::io(e.to_string()))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| ManagerError::io(format!("Failed to create {target:?}: {e}")))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                ManagerError::io(format!(
                    "Failed to copy {:?} to {:?}: {}",
                    entry.path(),
                    target,
                    e
                ))
            })?;
            copied_files += 1;
        }
    }

    log::debug!(
        "Mirrored {:?} -> {:?} ({} files)",
        source,
        destination,
        copied_files
    );
    Ok(())
}

fn clear_destination(destination: &Path) -> Result<()> {
    match fs::symlink_metadata(destination) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(destination).map_err(|e| {
            ManagerError::io(format!("Failed to clear destination {destination:?}: {e}"))
        })?,
        Ok(_) => fs::remove_file(destination).map_err(|e| {
            ManagerError::io(format!("Failed to clear destination {destination:?}: {e}"))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ManagerError::io(format!(
                "Failed to inspect destination {destination:?}: {e}"
            )))
        }
    }
    fs::create_dir_all(destination)
        .map_err(|e| ManagerError::io(format!("Failed to create {destination:?}: {e}")))
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let points_to: PathBuf = fs::read_link(link)
        .map_err(|e| ManagerError::io(format!("Failed to read link {link:?}: {e}")))?;
    std::os::unix::fs::symlink(&points_to, target)
        .map_err(|e| ManagerError::io(format!("Failed to create link {target:?}: {e}")))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let resolved: PathBuf = fs::canonicalize(link)
        .map_err(|e| ManagerError::io(format!("Failed to resolve link {link:?}: {e}")))?;
    if resolved.is_dir() {
        return mirror_blocking(&resolved, target, &CancellationToken::new());
    }
    fs::copy(&resolved, target)
        .map(|_| ())
        .map_err(|e| ManagerError::io(format!("Failed to copy {resolved:?}: {e}")))
}
