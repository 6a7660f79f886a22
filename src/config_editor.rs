//! Key/value editing of line-oriented server configuration files.
//!
//! Neo4j reads `key=value` lines; `#` starts a comment. Edits rewrite only the
//! matching line and leave every other line (comments, blank lines, ordering)
//! untouched.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ManagerError, Result};

#[derive(Debug, Clone)]
pub struct ConfigEditor {
    path: PathBuf,
}

impl ConfigEditor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value of the first uncommented `key=value` line, if any.
    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let raw = self.read()?;
        Ok(split_bom(&raw)
            .1
            .lines()
            .find_map(|line| match_setting(line, key).map(|value| value.to_string())))
    }

    /// Replace the value of the first matching line in place, or append a new line.
    ///
    /// The whole file is read, edited and written back before returning.
    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() || key.contains('=') || key.starts_with('#') {
            return Err(ManagerError::config_write(format!(
                "invalid setting key {key:?}"
            )));
        }
        if value.contains(['\n', '\r']) {
            return Err(ManagerError::config_write(format!(
                "value for {key} spans multiple lines"
            )));
        }

        let raw = self
            .read()
            .map_err(|e| ManagerError::config_write(e.to_string()))?;
        let (bom, content) = split_bom(&raw);
        let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };

        let mut replaced = false;
        let mut lines: Vec<String> = content
            .lines()
            .map(|line| {
                if !replaced && match_setting(line, key).is_some() {
                    replaced = true;
                    format!("{key}={value}")
                } else {
                    line.to_string()
                }
            })
            .collect();
        if !replaced {
            lines.push(format!("{key}={value}"));
        }

        let mut output = String::from(bom);
        output.push_str(&lines.join(newline));
        output.push_str(newline);
        self.write(&output)
    }

    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(ManagerError::io(format!(
                "Failed to read config file {:?}: {}",
                self.path, e
            ))),
        }
    }

    fn write(&self, content: &str) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| ManagerError::config_write("config file has no parent directory"))?;
        fs::create_dir_all(parent).map_err(|e| {
            ManagerError::config_write(format!("Failed to create {parent:?}: {e}"))
        })?;

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("config");
        let staging = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&staging, content).map_err(|e| {
            ManagerError::config_write(format!("Failed to write {:?}: {}", self.path, e))
        })?;
        fs::rename(&staging, &self.path).map_err(|e| {
            let _ = fs::remove_file(&staging);
            ManagerError::config_write(format!("Failed to replace {:?}: {}", self.path, e))
        })
    }
}

/// Split a leading UTF-8 byte order mark from the text.
fn split_bom(content: &str) -> (&str, &str) {
    match content.strip_prefix('\u{feff}') {
        Some(rest) => ("\u{feff}", rest),
        None => ("", content),
    }
}

/// Return the value when `line` is an uncommented setting for `key`.
fn match_setting<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let (line_key, value) = trimmed.split_once('=')?;
    if line_key.trim() == key {
        Some(value.trim())
    } else {
        None
    }
}
