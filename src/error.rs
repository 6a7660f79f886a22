//! Manager error types.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Error returned by every pool, provider and helper operation.
///
/// Carries a machine-readable [`ErrorKind`] and a small string payload that the
/// API layer forwards as-is.
#[derive(Debug)]
pub struct ManagerError {
    payload: BTreeMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An instance with this id already exists in the pool
    DuplicateId,
    /// No instance with this id
    NotFound,
    /// No server family supports the requested version
    UnsupportedVersion,
    /// Directory, port or distribution provisioning failed during create
    ProvisioningFailed,
    /// The server did not become ready in time
    StartupTimeout,
    /// No usable Java runtime for the server family
    RuntimeNotFound,
    /// File system error (mirror, copy, delete)
    Io,
    /// The server configuration file could not be written
    ConfigWrite,
    /// Process spawn or control error
    Process,
    /// The caller cancelled the operation
    Cancelled,
    /// Manager configuration error
    Config,
    /// Network error while fetching a distribution
    Network,
    /// Archive backup or restore error
    Backup,
    /// One or more instances failed to delete
    DeleteAll,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::DuplicateId => 1001,
            Self::NotFound => 1002,
            Self::UnsupportedVersion => 1003,
            Self::ProvisioningFailed => 1004,
            Self::DeleteAll => 1005,
            Self::Io => 2001,
            Self::ConfigWrite => 2002,
            Self::Config => 2003,
            Self::Network => 2004,
            Self::Process => 3001,
            Self::StartupTimeout => 3002,
            Self::RuntimeNotFound => 3003,
            Self::Cancelled => 3004,
            Self::Backup => 4001,
        }
    }
}

impl ManagerError {
    pub fn new(kind: ErrorKind, payload: BTreeMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            BTreeMap::new()
        } else {
            BTreeMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn duplicate_id(id: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateId,
            BTreeMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            BTreeMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn unsupported_version(version: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedVersion,
            BTreeMap::from([("version".to_string(), version.to_string())]),
        )
    }

    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::ProvisioningFailed, message)
    }

    pub fn startup_timeout(id: &str, timeout_secs: u64) -> Self {
        Self::new(
            ErrorKind::StartupTimeout,
            BTreeMap::from([
                ("id".to_string(), id.to_string()),
                ("timeout_secs".to_string(), timeout_secs.to_string()),
            ]),
        )
    }

    pub fn runtime_not_found(java_major: u32) -> Self {
        Self::new(
            ErrorKind::RuntimeNotFound,
            BTreeMap::from([("java_major".to_string(), java_major.to_string())]),
        )
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn config_write(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::ConfigWrite, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, BTreeMap::new())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            BTreeMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn backup(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Backup, message)
    }

    pub fn backup_family_mismatch(backup_family: &str, instance_family: &str) -> Self {
        Self::new(
            ErrorKind::Backup,
            BTreeMap::from([
                ("backup_family".to_string(), backup_family.to_string()),
                ("instance_family".to_string(), instance_family.to_string()),
            ]),
        )
    }

    /// Aggregate of per-instance failures, keyed by instance id.
    pub fn delete_all(failures: Vec<(String, Self)>) -> Self {
        let payload = failures
            .into_iter()
            .map(|(id, err)| (id, err.to_string()))
            .collect();
        Self::new(ErrorKind::DeleteAll, payload)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn payload(&self) -> &BTreeMap<String, String> {
        &self.payload
    }

    /// Rewrap as a provisioning failure unless the kind is one the caller of
    /// `create` needs to see unchanged.
    pub(crate) fn into_provisioning(self) -> Self {
        match self.kind {
            ErrorKind::ProvisioningFailed
            | ErrorKind::UnsupportedVersion
            | ErrorKind::Cancelled
            | ErrorKind::DuplicateId => self,
            _ => Self::provisioning(self.to_string()),
        }
    }
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for ManagerError {}

impl Serialize for ManagerError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("ManagerError", 3)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for ManagerError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for ManagerError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for ManagerError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for ManagerError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for ManagerError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::io(err.to_string())
    }
}

impl From<walkdir::Error> for ManagerError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for ManagerError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, ManagerError>;
