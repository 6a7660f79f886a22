use std::path::{Component, Path};

use crate::error::{ManagerError, Result};

const MAX_INSTANCE_ID_LEN: usize = 64;

fn is_safe_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Instance ids become directory names under the base path.
pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    if instance_id.len() > MAX_INSTANCE_ID_LEN || !is_safe_segment(instance_id) {
        return Err(ManagerError::provisioning(format!(
            "invalid instance id {instance_id:?}"
        )));
    }
    Ok(())
}

/// Config file names are resolved inside `<home>/conf` and must not leave it.
pub fn validate_config_file_name(config_file: &str) -> Result<()> {
    let path = Path::new(config_file);
    let mut components = path.components();
    let is_plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !is_plain || !is_safe_segment(config_file) {
        return Err(ManagerError::config_write(format!(
            "invalid config file name {config_file:?}"
        )));
    }
    Ok(())
}

/// Reject a mirror whose source and destination overlap.
pub fn ensure_disjoint(source: &Path, destination: &Path) -> Result<()> {
    let source = source
        .canonicalize()
        .map_err(|e| ManagerError::io(format!("failed to resolve {source:?}: {e}")))?;
    let destination = match destination.canonicalize() {
        Ok(path) => path,
        Err(_) => match destination.parent().map(Path::canonicalize) {
            Some(Ok(parent)) => match destination.file_name() {
                Some(name) => parent.join(name),
                None => parent,
            },
            _ => return Ok(()),
        },
    };

    if source.starts_with(&destination) || destination.starts_with(&source) {
        return Err(ManagerError::io(format!(
            "mirror source {source:?} and destination {destination:?} overlap"
        )));
    }
    Ok(())
}
