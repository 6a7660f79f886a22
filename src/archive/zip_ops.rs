use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ManagerError, Result};

use super::extract::write_entry;
use super::path::{parse_entry_rel_path, resolve_within_dir, strip_top_dir, TopDirScanner};

/// Append `dir` recursively to a zip archive below `prefix`.
pub(crate) fn append_dir_tree_to_zip<W: io::Write + io::Seek>(
    writer: &mut zip::ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: zip::write::SimpleFileOptions,
) -> Result<()> {
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(dir)
            .map_err(|e| ManagerError::io(e.to_string()))?;
        // Entry names always use forward slashes.
        let relative = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");
        let archive_path = if relative.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}/{relative}")
        };

        if entry.file_type().is_dir() {
            writer.add_directory(&archive_path, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(&archive_path, options)?;
            let mut file = fs::File::open(path)
                .map_err(|e| ManagerError::io(format!("failed to open {path:?}: {e}")))?;
            io::copy(&mut file, writer)
                .map_err(|e| ManagerError::io(format!("failed to archive {path:?}: {e}")))?;
        } else {
            log::warn!("Skipping non-regular file {:?} while archiving", path);
        }
    }

    Ok(())
}

/// Extract zip entries using a caller-provided destination resolver.
///
/// Returning `None` from `destination_for` skips the entry. Symlink entries
/// are skipped with a warning.
pub(crate) fn extract_zip_mapped<F>(
    archive_path: &Path,
    dest_dir: &Path,
    mut destination_for: F,
) -> Result<()>
where
    F: FnMut(&str) -> Option<PathBuf>,
{
    fs::create_dir_all(dest_dir)
        .map_err(|e| ManagerError::io(format!("failed to create {dest_dir:?}: {e}")))?;
    let file = fs::File::open(archive_path)
        .map_err(|e| ManagerError::io(format!("failed to open {archive_path:?}: {e}")))?;
    let mut archive = zip::ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw_name = entry.name().to_string();

        if parse_entry_rel_path(&raw_name).is_none() {
            return Err(ManagerError::io(format!(
                "archive contains unsafe zip path: {raw_name:?}"
            )));
        }

        let Some(out_path) = destination_for(&raw_name) else {
            continue;
        };
        let resolved = resolve_within_dir(dest_dir, &out_path)?;

        if entry.is_symlink() {
            log::warn!("Skipping symlink entry {:?} in {:?}", raw_name, archive_path);
            continue;
        }

        let is_dir = entry.is_dir();
        let unix_mode = entry.unix_mode();
        let declared_size = (!is_dir).then(|| entry.size());
        write_entry(&resolved, is_dir, &mut entry, unix_mode, declared_size)?;
    }

    Ok(())
}

/// Extract a zip archive into `dest_dir`, dropping a shared top-level directory.
pub(crate) fn extract_zip_flat(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let top_dir = {
        let file = fs::File::open(archive_path)
            .map_err(|e| ManagerError::io(format!("failed to open {archive_path:?}: {e}")))?;
        let archive = zip::ZipArchive::new(file)?;
        let mut scanner = TopDirScanner::default();
        archive.file_names().for_each(|name| scanner.observe(name));
        scanner.finish()
    };

    extract_zip_mapped(archive_path, dest_dir, |raw_name| {
        let relative = parse_entry_rel_path(raw_name)?;
        let stripped = strip_top_dir(&relative, top_dir.as_deref())?;
        Some(dest_dir.join(stripped))
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write as _;

    use super::*;

    fn build_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn flat_extraction_strips_the_distribution_folder() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("neo4j.zip");
        build_zip(
            &archive,
            &[
                ("neo4j-community-3.2.3/", ""),
                ("neo4j-community-3.2.3/conf/neo4j.conf", "dbms.active_database=graph.db\n"),
                ("neo4j-community-3.2.3/lib/neo4j.jar", "jar"),
            ],
        );
        let dest = dir.path().join("out");

        extract_zip_flat(&archive, &dest).unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("conf").join("neo4j.conf")).unwrap(),
            "dbms.active_database=graph.db\n"
        );
        assert!(dest.join("lib").join("neo4j.jar").is_file());
        assert!(!dest.join("neo4j-community-3.2.3").exists());
    }

    #[test]
    fn traversal_entries_fail_the_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        build_zip(&archive, &[("../escape.txt", "x")]);

        let err = extract_zip_flat(&archive, &dir.path().join("out")).unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn directory_tree_is_archived_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("graph.db").join("schema")).unwrap();
        fs::write(data.join("graph.db").join("neostore"), "store").unwrap();

        let archive = dir.path().join("backup.zip");
        {
            let file = fs::File::create(&archive).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            append_dir_tree_to_zip(
                &mut writer,
                &data,
                "data",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            writer.finish().unwrap();
        }

        let restored = dir.path().join("restored");
        extract_zip_mapped(&archive, &restored, |name| {
            parse_entry_rel_path(name).map(|p| restored.join(p))
        })
        .unwrap();

        assert_eq!(
            fs::read_to_string(restored.join("data").join("graph.db").join("neostore")).unwrap(),
            "store"
        );
        assert!(restored.join("data").join("graph.db").join("schema").is_dir());
    }
}
