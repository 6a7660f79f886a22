use std::env::consts::OS;

/// Host operating systems the runtime resolver distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl HostOs {
    pub fn current() -> Self {
        match OS {
            "windows" => Self::Windows,
            "macos" => Self::MacOs,
            "linux" => Self::Linux,
            _ => Self::Other,
        }
    }

    /// Separator between classpath entries on this OS.
    pub fn classpath_separator(self) -> &'static str {
        match self {
            Self::Windows => ";",
            _ => ":",
        }
    }

    pub fn java_exe_name(self) -> &'static str {
        match self {
            Self::Windows => "java.exe",
            _ => "java",
        }
    }
}

/// Archive formats a distribution can be shipped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Guess the format from a URL or file name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.split('#').next().unwrap_or(name).to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}
