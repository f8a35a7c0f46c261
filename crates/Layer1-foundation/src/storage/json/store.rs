//! JSON settings store
//!
//! One directory of JSON files. Global settings live under the platform
//! config dir (`termtask/`), project settings under `<root>/.termtask/`.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Directory name used for project-local settings
pub const PROJECT_DIR: &str = ".termtask";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<config dir>/termtask/`
    pub fn global() -> Result<Self> {
        dirs::config_dir()
            .map(|dir| Self::new(dir.join("termtask")))
            .ok_or_else(|| Error::Config("No platform config directory".to_string()))
    }

    /// `<root>/.termtask/`
    pub fn project(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(PROJECT_DIR))
    }

    pub fn current_project() -> Result<Self> {
        Ok(Self::project(std::env::current_dir()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `None` when the file does not exist
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.dir.join(filename);
        trace!("Reading {}", path.display());
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::config_file(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::config_file(&path, e))
    }

    /// Raw JSON value, used for layered merges
    pub fn load_value(&self, filename: &str) -> Result<Option<serde_json::Value>> {
        self.load(filename)
    }

    /// Pretty-printed, creating the directory on demand
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        let content = serde_json::to_string_pretty(data)?;
        fs::write(&path, content).map_err(|e| Error::config_file(&path, e))
    }
}
