use std::fs;
use std::io;
use std::path::Path;

use crate::error::{ManagerError, Result};

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| ManagerError::io(format!("failed to set permissions on {path:?}: {e}")))?;
    }
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Write one archive entry (directory or regular file) to `out_path`.
///
/// For files, the number of bytes written must match `declared_size` when known.
pub(super) fn write_entry<R>(
    out_path: &Path,
    is_dir: bool,
    reader: &mut R,
    mode: Option<u32>,
    declared_size: Option<u64>,
) -> Result<()>
where
    R: io::Read,
{
    if is_dir {
        return fs::create_dir_all(out_path)
            .map_err(|e| ManagerError::io(format!("failed to create directory {out_path:?}: {e}")));
    }

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ManagerError::io(format!("failed to create directory {parent:?}: {e}")))?;
    }

    let mut file = fs::File::create(out_path)
        .map_err(|e| ManagerError::io(format!("failed to create {out_path:?}: {e}")))?;
    let written = io::copy(reader, &mut file)
        .map_err(|e| ManagerError::io(format!("failed to write {out_path:?}: {e}")))?;
    if let Some(expected) = declared_size {
        if written != expected {
            return Err(ManagerError::io(format!(
                "entry {out_path:?} is truncated: expected {expected} bytes, wrote {written}"
            )));
        }
    }
    apply_mode(out_path, mode)
}
