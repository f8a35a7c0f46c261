//! Error types for termtask
//!
//! Infrastructure errors shared by every layer. Task-level failures that are
//! reported to callers use the engine's `TaskError`, which wraps these.

use std::path::Path;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Settings that could not be located, read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Terminals
    // ========================================================================
    #[error("Terminal error: {0}")]
    Terminal(String),

    #[error("Terminal {0} is disposed")]
    TerminalDisposed(u32),

    /// Problem pattern that does not compile
    #[error("Invalid problem pattern: {0}")]
    Regex(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Config error naming the file it came from
    pub fn config_file(path: &Path, reason: impl std::fmt::Display) -> Self {
        Error::Config(format!("{}: {}", path.display(), reason))
    }

    /// Whether retrying on another terminal can help
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Terminal(_) | Error::TerminalDisposed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Error::TerminalDisposed(7).to_string(), "Terminal 7 is disposed");
        let err = Error::config_file(Path::new("/tmp/engine.json"), "missing brace");
        assert_eq!(err.to_string(), "Configuration error: /tmp/engine.json: missing brace");
    }

    #[test]
    fn test_is_terminal() {
        assert!(Error::Terminal("no pty".into()).is_terminal());
        assert!(Error::TerminalDisposed(3).is_terminal());
        assert!(!Error::Regex("(".into()).is_terminal());
    }
}
