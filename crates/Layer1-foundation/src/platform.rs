//! Platform detection
//!
//! Host OS probing, default shell lookup and executable resolution.

use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Operating system family a task runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Mac,
    Linux,
    Web,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Mac
        } else {
            Self::Linux
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Mac => "macOS",
            Self::Linux => "Linux",
            Self::Web => "Web",
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }

    pub fn path_separator(&self) -> &'static str {
        if self.is_windows() {
            "\\"
        } else {
            "/"
        }
    }

    /// Default shell executable when no profile is configured
    pub fn default_shell(&self) -> String {
        match self {
            Self::Windows => "powershell.exe".to_string(),
            _ => env::var("SHELL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "/bin/bash".to_string()),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::detect()
    }
}

/// Resolve `command` to an executable path.
///
/// `paths` replaces `PATH` when given; relative commands containing a
/// separator are resolved against `cwd`.
pub fn find_executable(command: &str, cwd: Option<&Path>, paths: Option<&[String]>) -> Option<PathBuf> {
    let as_path = Path::new(command);
    if as_path.is_absolute() {
        return as_path.exists().then(|| as_path.to_path_buf());
    }
    if as_path.components().count() > 1 {
        let candidate = cwd.map(|c| c.join(as_path)).unwrap_or_else(|| as_path.to_path_buf());
        return candidate.exists().then_some(candidate);
    }

    let search: Option<OsString> = match paths {
        Some(paths) => env::join_paths(paths).ok(),
        None => env::var_os("PATH"),
    };
    let search_cwd = cwd
        .map(Path::to_path_buf)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    which::which_in(command, search, search_cwd).ok()
}
