//! Zip archives of an instance's data directory.
//!
//! Layout: `backup.toml` with [`BackupMetadata`], then the data directory
//! under `data/`.

use std::fs::{self, File};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::{append_dir_tree_to_zip, extract_zip_mapped, parse_entry_rel_path};
use crate::error::{ManagerError, Result};
use crate::instance::ServerFamily;
use crate::versions::Edition;

const METADATA_ENTRY: &str = "backup.toml";
const DATA_PREFIX: &str = "data";

/// Metadata stored alongside the archived data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub created_at: String,
    pub instance_id: String,
    pub version: semver::Version,
    pub edition: Edition,
    pub family: ServerFamily,
}

impl BackupMetadata {
    pub fn new(
        instance_id: &str,
        version: &semver::Version,
        edition: Edition,
        family: ServerFamily,
    ) -> Self {
        Self {
            created_at: chrono::Utc::now().to_rfc3339(),
            instance_id: instance_id.to_string(),
            version: version.clone(),
            edition,
            family,
        }
    }
}

/// Write `data_dir` and `metadata` to a zip archive at `dest`.
///
/// The archive is assembled in a sibling file and renamed into place.
pub fn write_backup_archive(data_dir: &Path, dest: &Path, metadata: &BackupMetadata) -> Result<()> {
    if !data_dir.is_dir() {
        return Err(ManagerError::backup(format!(
            "No data directory to back up at {data_dir:?}"
        )));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ManagerError::backup(format!("Failed to create {parent:?}: {e}")))?;
    }

    let staging = staging_path(dest);
    let result = write_archive(data_dir, &staging, metadata).and_then(|()| {
        fs::rename(&staging, dest).map_err(|e| {
            ManagerError::backup(format!("Failed to move backup archive to {dest:?}: {e}"))
        })
    });
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("backup.zip");
    dest.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()))
}

fn write_archive(data_dir: &Path, path: &Path, metadata: &BackupMetadata) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| ManagerError::backup(format!("Failed to create backup archive: {e}")))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    let metadata_toml = toml::to_string_pretty(metadata)
        .map_err(|e| ManagerError::backup(format!("Failed to serialize metadata: {e}")))?;
    writer
        .start_file(METADATA_ENTRY, options)
        .map_err(|e| ManagerError::backup(format!("Failed to add metadata: {e}")))?;
    writer
        .write_all(metadata_toml.as_bytes())
        .map_err(|e| ManagerError::backup(format!("Failed to write metadata: {e}")))?;

    append_dir_tree_to_zip(&mut writer, data_dir, DATA_PREFIX, options)
        .map_err(|e| ManagerError::backup(format!("Failed to add data dir: {e}")))?;

    writer
        .finish()
        .map_err(|e| ManagerError::backup(format!("Failed to finalize backup archive: {e}")))?;
    Ok(())
}

/// Read the metadata entry of a backup archive.
pub fn read_backup_metadata(archive: &Path) -> Result<BackupMetadata> {
    let file = File::open(archive)
        .map_err(|e| ManagerError::backup(format!("Failed to open backup {archive:?}: {e}")))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| ManagerError::backup(format!("Failed to read zip: {e}")))?;
    let mut entry = zip
        .by_name(METADATA_ENTRY)
        .map_err(|e| ManagerError::backup(format!("{METADATA_ENTRY} not found: {e}")))?;

    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| ManagerError::backup(e.to_string()))?;
    toml::from_str(&content)
        .map_err(|e| ManagerError::backup(format!("Failed to parse metadata: {e}")))
}

/// Replace `data_dir` with the `data/` tree of a backup archive.
pub fn extract_backup_data(archive: &Path, data_dir: &Path) -> Result<()> {
    if data_dir.exists() {
        fs::remove_dir_all(data_dir)
            .map_err(|e| ManagerError::io(format!("Failed to clear {data_dir:?}: {e}")))?;
    }
    fs::create_dir_all(data_dir)
        .map_err(|e| ManagerError::io(format!("Failed to create {data_dir:?}: {e}")))?;

    extract_zip_mapped(archive, data_dir, |raw_name| {
        let relative = parse_entry_rel_path(raw_name)?;
        let inside = relative.strip_prefix(DATA_PREFIX).ok()?;
        (!inside.as_os_str().is_empty()).then(|| data_dir.join(inside))
    })
    .map_err(|e| ManagerError::backup(format!("Failed to extract backup: {e}")))
}
