use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ManagerError, Result};

use super::extract::write_entry;
use super::path::{parse_entry_rel_path, resolve_within_dir, strip_top_dir, TopDirScanner};

fn open_archive(archive_path: &Path) -> Result<tar::Archive<flate2::read::GzDecoder<fs::File>>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| ManagerError::io(format!("failed to open {archive_path:?}: {e}")))?;
    Ok(tar::Archive::new(flate2::read::GzDecoder::new(file)))
}

fn entry_name<R: std::io::Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry.path()?;
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| ManagerError::io(format!("archive entry path is not valid UTF-8: {path:?}")))
}

fn extract_tar_gz_mapped<F>(archive_path: &Path, dest_dir: &Path, mut destination_for: F) -> Result<()>
where
    F: FnMut(&str) -> Option<PathBuf>,
{
    fs::create_dir_all(dest_dir)
        .map_err(|e| ManagerError::io(format!("failed to create {dest_dir:?}: {e}")))?;
    let mut archive = open_archive(archive_path)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_name = entry_name(&entry)?;

        if parse_entry_rel_path(&raw_name).is_none() {
            return Err(ManagerError::io(format!(
                "archive contains unsafe entry path: {raw_name:?}"
            )));
        }

        let Some(out_path) = destination_for(&raw_name) else {
            continue;
        };
        let resolved = resolve_within_dir(dest_dir, &out_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            log::warn!("Skipping link entry {:?} in {:?}", raw_name, archive_path);
            continue;
        }
        if !entry_type.is_dir() && !entry_type.is_file() {
            // pax headers and similar metadata records
            log::debug!("Ignoring tar entry {:?} of type {:?}", raw_name, entry_type);
            continue;
        }

        let unix_mode = entry.header().mode().ok();
        let declared_size = if entry_type.is_file() {
            Some(entry.header().size()?)
        } else {
            None
        };
        write_entry(
            &resolved,
            entry_type.is_dir(),
            &mut entry,
            unix_mode,
            declared_size,
        )?;
    }

    Ok(())
}

/// Extract a tar.gz archive into `dest_dir`, dropping a shared top-level directory.
pub(crate) fn extract_tar_gz_flat(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let mut scanner = TopDirScanner::default();
    let mut archive = open_archive(archive_path)?;
    for entry in archive.entries()? {
        let entry = entry?;
        if let Ok(name) = entry_name(&entry) {
            scanner.observe(&name);
        }
    }
    let top_dir = scanner.finish();

    extract_tar_gz_mapped(archive_path, dest_dir, |raw_name| {
        let relative = parse_entry_rel_path(raw_name)?;
        let stripped = strip_top_dir(&relative, top_dir.as_deref())?;
        Some(dest_dir.join(stripped))
    })
}
