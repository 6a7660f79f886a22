use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{ManagerError, Result};

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Convert an archive entry name to a relative path.
///
/// Returns `None` for empty names, absolute names, drive-prefixed names and
/// any name containing a `..` segment.
pub(crate) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::Normal(segment) => normalized.push(segment),
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ManagerError::io(format!(
                        "path {path:?} escapes the filesystem root"
                    )));
                }
            }
        }
    }

    let mut existing = normalized.clone();
    let mut missing = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(mut resolved) => {
                resolved.extend(missing.into_iter().rev());
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name().map(|n| n.to_owned()) else {
                    return Err(ManagerError::io(format!(
                        "no existing prefix for {normalized:?}"
                    )));
                };
                missing.push(name);
                existing.pop();
            }
            Err(e) => {
                return Err(ManagerError::io(format!(
                    "failed to canonicalize {existing:?}: {e}"
                )))
            }
        }
    }
}

/// Resolve `path` and verify it stays inside `base_dir`.
pub(super) fn resolve_within_dir(base_dir: &Path, path: &Path) -> Result<PathBuf> {
    let base = base_dir
        .canonicalize()
        .map_err(|e| ManagerError::io(format!("failed to canonicalize {base_dir:?}: {e}")))?;
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let resolved = canonicalize_existing_prefix(&candidate)?;

    if !resolved.starts_with(&base) {
        return Err(ManagerError::io(format!(
            "archive entry {path:?} escapes the extraction directory"
        )));
    }
    Ok(resolved)
}

/// Tracks whether every entry of an archive sits below one common top directory,
/// as in `neo4j-community-3.2.3/bin/neo4j`.
#[derive(Debug, Default)]
pub(super) struct TopDirScanner {
    candidate: Option<String>,
    saw_nested: bool,
    mixed: bool,
}

impl TopDirScanner {
    pub(super) fn observe(&mut self, raw: &str) {
        if self.mixed {
            return;
        }
        let Some(relative) = parse_entry_rel_path(raw) else {
            return;
        };
        let mut components = relative.components();
        let Some(first) = components.next().and_then(|c| c.as_os_str().to_str()) else {
            self.mixed = true;
            return;
        };
        if components.next().is_some() {
            self.saw_nested = true;
        }
        match self.candidate.as_deref() {
            None => self.candidate = Some(first.to_string()),
            Some(existing) if existing == first => {}
            Some(_) => self.mixed = true,
        }
    }

    pub(super) fn finish(self) -> Option<String> {
        if self.mixed || !self.saw_nested {
            None
        } else {
            self.candidate
        }
    }
}

/// Strip `top_dir` from `relative`; the top directory entry itself maps to `None`.
pub(super) fn strip_top_dir(relative: &Path, top_dir: Option<&str>) -> Option<PathBuf> {
    let Some(top) = top_dir else {
        return Some(relative.to_path_buf());
    };
    let stripped = relative.strip_prefix(top).ok()?;
    (!stripped.as_os_str().is_empty()).then(|| stripped.to_path_buf())
}
