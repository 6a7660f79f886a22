//! Java runtime resolution for launching server processes.

use std::cmp::Ordering;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::paths::java_exe_path;
use crate::platform::HostOs;

/// Finds the `java` executable a server family needs.
///
/// Nothing is cached: every call inspects the file system again, so a runtime
/// installed or removed between two starts is picked up.
#[derive(Debug, Clone)]
pub struct RuntimeResolver {
    java_home: Option<PathBuf>,
    runtimes_path: PathBuf,
    os: HostOs,
}

impl RuntimeResolver {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            java_home: config.java_home.clone(),
            runtimes_path: config.runtimes_path.clone(),
            os: HostOs::current(),
        }
    }

    /// Resolve the executable for a Java major version.
    ///
    /// Order: configured `java_home`, managed runtimes, `JAVA_HOME`, `PATH`.
    /// The configured home is taken as is; the environment fallbacks are only
    /// accepted when their version matches `java_major`.
    pub fn resolve(&self, java_major: u32) -> Result<PathBuf> {
        self.resolve_with(
            java_major,
            std::env::var_os("JAVA_HOME").map(PathBuf::from),
            std::env::var_os("PATH"),
        )
    }

    fn resolve_with(
        &self,
        java_major: u32,
        env_java_home: Option<PathBuf>,
        env_path: Option<OsString>,
    ) -> Result<PathBuf> {
        if let Some(home) = &self.java_home {
            return self
                .java_in_home(home)
                .ok_or_else(|| ManagerError::runtime_not_found(java_major));
        }

        if let Some(exe) = self.find_managed_runtime(java_major) {
            return Ok(exe);
        }

        if let Some(exe) = env_java_home
            .filter(|home| home_matches_major(home, java_major))
            .and_then(|home| self.java_in_home(&home))
        {
            return Ok(exe);
        }

        env_path
            .and_then(|path| self.find_on_path(&path, java_major))
            .ok_or_else(|| ManagerError::runtime_not_found(java_major))
    }

    fn java_in_home(&self, home: &Path) -> Option<PathBuf> {
        let exe = java_exe_path(home);
        if exe.is_file() {
            return Some(exe);
        }
        if self.os == HostOs::MacOs {
            let bundled = java_exe_path(&home.join("Contents").join("Home"));
            if bundled.is_file() {
                return Some(bundled);
            }
        }
        None
    }

    fn find_managed_runtime(&self, java_major: u32) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.runtimes_path).ok()?;
        let mut candidates: Vec<(String, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                is_runtime_dir_for(&name, java_major).then(|| (name, entry.path()))
            })
            .collect();

        candidates.sort_by(|a, b| compare_runtime_names(&b.0, &a.0));

        candidates
            .into_iter()
            .find_map(|(_, dir)| self.java_in_home(&dir))
    }

    /// First `java` on `path` whose home (found through symlinks) matches.
    fn find_on_path(&self, path: &OsStr, java_major: u32) -> Option<PathBuf> {
        std::env::split_paths(path)
            .map(|dir| dir.join(self.os.java_exe_name()))
            .filter(|candidate| candidate.is_file())
            .find(|candidate| {
                candidate
                    .canonicalize()
                    .ok()
                    .as_deref()
                    .and_then(Path::parent)
                    .and_then(Path::parent)
                    .is_some_and(|home| home_matches_major(home, java_major))
            })
    }
}

/// Major version from a `JAVA_VERSION="1.8.0_144"` or `JAVA_VERSION="17.0.2"`
/// line of a Java home's `release` file.
fn release_major(home: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(home.join("release")).ok()?;
    let raw = content
        .lines()
        .find_map(|line| line.trim().strip_prefix("JAVA_VERSION="))?
        .trim()
        .trim_matches('"');
    let raw = raw.strip_prefix("1.").unwrap_or(raw);
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Whether a Java home is version `java_major`.
///
/// The `release` file decides when present, also one level up for a `jre`
/// nested in a JDK; otherwise the directory name must match.
fn home_matches_major(home: &Path, java_major: u32) -> bool {
    let found = release_major(home).or_else(|| {
        home.file_name()
            .is_some_and(|name| name == "jre")
            .then(|| home.parent().and_then(release_major))
            .flatten()
    });
    match found {
        Some(major) => major == java_major,
        None => home
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| is_runtime_dir_for(name, java_major)),
    }
}

/// Match runtime directory names such as `zulu8.23.0.3-jdk8.0.144-linux_x64`,
/// `jdk1.8.0_144`, `jre-8u144` or `jdk-11.0.2`.
fn is_runtime_dir_for(name: &str, java_major: u32) -> bool {
    let lower = name.to_ascii_lowercase();
    let major = java_major.to_string();
    ["zulu", "jdk", "jre"].iter().any(|prefix| {
        let Some(rest) = lower.strip_prefix(prefix) else {
            return false;
        };
        let rest = rest.strip_prefix('-').unwrap_or(rest);
        let rest = rest.strip_prefix("1.").unwrap_or(rest);
        let Some(after) = rest.strip_prefix(major.as_str()) else {
            return false;
        };
        !after.starts_with(|c: char| c.is_ascii_digit())
    })
}

/// Compare names by their numeric runs so `zulu8.40` sorts above `zulu8.9`.
fn compare_runtime_names(a: &str, b: &str) -> Ordering {
    let numbers = |s: &str| -> Vec<u64> {
        s.split(|c: char| !c.is_ascii_digit())
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse().ok())
            .collect()
    };
    numbers(a).cmp(&numbers(b)).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::fs;

    use super::*;

    fn fake_java_home(root: &Path, name: &str) -> PathBuf {
        let home = root.join(name);
        let exe = java_exe_path(&home);
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, "").unwrap();
        home
    }

    fn resolver(java_home: Option<PathBuf>, runtimes_path: &Path) -> RuntimeResolver {
        RuntimeResolver::new(&ManagerConfig {
            java_home,
            runtimes_path: runtimes_path.to_path_buf(),
            ..ManagerConfig::default()
        })
    }

    #[test]
    fn configured_java_home_wins() {
        let dir = tempfile::tempdir().unwrap();
        let home = fake_java_home(dir.path(), "custom");
        fake_java_home(&dir.path().join("runtimes"), "zulu8.40.0.25-ca-jdk8.0.222");

        let exe = resolver(Some(home.clone()), &dir.path().join("runtimes"))
            .resolve(8)
            .unwrap();

        assert_eq!(exe, java_exe_path(&home));
    }

    #[test]
    fn configured_java_home_without_java_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolver(Some(dir.path().join("missing")), dir.path())
            .resolve(8)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::RuntimeNotFound);
    }

    #[test]
    fn newest_managed_runtime_for_major_is_selected() {
        let dir = tempfile::tempdir().unwrap();
        let runtimes = dir.path().join("runtimes");
        fake_java_home(&runtimes, "zulu8.9.0.1-jdk8.0.92");
        let newest = fake_java_home(&runtimes, "zulu8.40.0.25-ca-jdk8.0.222");
        fake_java_home(&runtimes, "zulu11.31.11-ca-jdk11.0.3");

        let exe = resolver(None, &runtimes).resolve(8).unwrap();

        assert_eq!(exe, java_exe_path(&newest));
    }

    fn write_release(home: &Path, java_version: &str) {
        fs::write(
            home.join("release"),
            format!("IMPLEMENTOR=\"Azul Systems, Inc.\"\nJAVA_VERSION=\"{java_version}\"\n"),
        )
        .unwrap();
    }

    #[test]
    fn java_home_of_another_major_is_not_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let jdk17 = fake_java_home(dir.path(), "jdk-17.0.2");
        write_release(&jdk17, "17.0.2");

        let err = resolver(None, &dir.path().join("runtimes"))
            .resolve_with(8, Some(jdk17.clone()), None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::RuntimeNotFound);

        let exe = resolver(None, &dir.path().join("runtimes"))
            .resolve_with(17, Some(jdk17.clone()), None)
            .unwrap();
        assert_eq!(exe, java_exe_path(&jdk17));
    }

    #[test]
    fn java_home_release_file_decides_over_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let home = fake_java_home(dir.path(), "java-current");
        write_release(&home, "1.8.0_222");

        let exe = resolver(None, &dir.path().join("runtimes"))
            .resolve_with(8, Some(home.clone()), None)
            .unwrap();

        assert_eq!(exe, java_exe_path(&home));
    }

    #[test]
    fn path_fallback_skips_java_of_another_major() {
        let dir = tempfile::tempdir().unwrap();
        let jdk17 = fake_java_home(dir.path(), "jdk-17.0.2");
        write_release(&jdk17, "17.0.2");
        let jdk8 = fake_java_home(dir.path(), "jdk1.8.0_222");
        write_release(&jdk8, "1.8.0_222");
        let path = std::env::join_paths([
            java_exe_path(&jdk17).parent().unwrap(),
            java_exe_path(&jdk8).parent().unwrap(),
        ])
        .unwrap();

        let exe = resolver(None, &dir.path().join("runtimes"))
            .resolve_with(8, None, Some(path))
            .unwrap();

        assert_eq!(
            exe.canonicalize().unwrap(),
            java_exe_path(&jdk8).canonicalize().unwrap()
        );
    }

    #[test]
    fn release_versions_parse_to_their_major() {
        let dir = tempfile::tempdir().unwrap();
        for (raw, major) in [("1.8.0_144", 8), ("17.0.2", 17), ("11", 11), ("21-ea", 21)] {
            write_release(dir.path(), raw);
            assert_eq!(release_major(dir.path()), Some(major));
        }
        fs::write(dir.path().join("release"), "IMPLEMENTOR=x\n").unwrap();
        assert_eq!(release_major(dir.path()), None);
    }

    #[test]
    fn runtime_directory_names_match_by_major() {
        assert!(is_runtime_dir_for("zulu8.23.0.3-jdk8.0.144-linux_x64", 8));
        assert!(is_runtime_dir_for("jdk1.8.0_144", 8));
        assert!(is_runtime_dir_for("jre-8u144", 8));
        assert!(is_runtime_dir_for("jdk-11.0.2", 11));
        assert!(!is_runtime_dir_for("jdk-11.0.2", 1));
        assert!(!is_runtime_dir_for("zulu11.31", 8));
        assert!(!is_runtime_dir_for("openj9", 8));
    }
}
