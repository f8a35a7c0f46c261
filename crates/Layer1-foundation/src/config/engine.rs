//! Engine Config
//!
//! Tunables for the task engine and the PTY terminal backend. Loaded from
//! `engine.json` in the global config dir, then overlaid with the project's
//! `.termtask/engine.json`.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Config file name
pub const ENGINE_CONFIG_FILE: &str = "engine.json";

// ============================================================================
// Engine Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Quiet period after the last output line before problems are delivered
    pub output_debounce_ms: u64,

    /// Capacity of the task event broadcast channel
    pub event_channel_capacity: usize,

    /// Entries retained by the engine output channel
    pub output_max_entries: usize,

    pub terminal: TerminalConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_debounce_ms: 3000,
            event_channel_capacity: 1024,
            output_max_entries: 2000,
            terminal: TerminalConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_debounce(&self) -> Duration {
        Duration::from_millis(self.output_debounce_ms)
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Global + current project, project wins
    pub fn load() -> Result<Self> {
        let mut layers = Vec::new();
        if let Ok(global) = JsonStore::global() {
            layers.extend(global.load_value(ENGINE_CONFIG_FILE)?);
        }
        if let Ok(project) = JsonStore::current_project() {
            layers.extend(project.load_value(ENGINE_CONFIG_FILE)?);
        }
        Self::from_layers(layers)
    }

    pub fn load_from(stores: &[JsonStore]) -> Result<Self> {
        let mut layers = Vec::new();
        for store in stores {
            layers.extend(store.load_value(ENGINE_CONFIG_FILE)?);
        }
        Self::from_layers(layers)
    }

    fn from_layers(layers: Vec<Value>) -> Result<Self> {
        debug!("Loading engine config from {} layers", layers.len());
        let mut merged = serde_json::to_value(Self::default())?;
        for layer in layers {
            merge_json(&mut merged, layer);
        }
        Ok(serde_json::from_value(merged)?)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_output_debounce(mut self, debounce: Duration) -> Self {
        self.output_debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    pub fn with_default_shell(mut self, shell: impl Into<String>) -> Self {
        self.terminal.default_shell = Some(shell.into());
        self
    }
}

// ============================================================================
// Terminal Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalConfig {
    pub rows: u16,
    pub cols: u16,

    /// Lines of scrollback kept per terminal (used for reconnection replay)
    pub scrollback_lines: usize,

    /// Overrides the platform default shell
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_shell: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_shell_args: Vec<String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 120,
            scrollback_lines: 1000,
            default_shell: None,
            default_shell_args: Vec::new(),
        }
    }
}

/// Objects merge recursively; everything else is replaced by `overlay`
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.output_debounce(), Duration::from_millis(3000));
        assert_eq!(config.terminal.rows, 24);
        assert!(config.terminal.default_shell.is_none());
    }

    #[test]
    fn test_layers_override_in_order() {
        let global = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let global_store = JsonStore::new(global.path());
        let project_store = JsonStore::new(project.path());

        global_store
            .save(
                ENGINE_CONFIG_FILE,
                &json!({ "outputDebounceMs": 500, "terminal": { "rows": 40, "defaultShell": "/bin/zsh" } }),
            )
            .unwrap();
        project_store
            .save(ENGINE_CONFIG_FILE, &json!({ "terminal": { "rows": 50 } }))
            .unwrap();

        let config = EngineConfig::load_from(&[global_store, project_store]).unwrap();
        assert_eq!(config.output_debounce_ms, 500);
        assert_eq!(config.terminal.rows, 50);
        assert_eq!(config.terminal.cols, 120);
        assert_eq!(config.terminal.default_shell.as_deref(), Some("/bin/zsh"));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_output_debounce(Duration::from_millis(20))
            .with_event_channel_capacity(0)
            .with_default_shell("sh");
        assert_eq!(config.output_debounce_ms, 20);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.terminal.default_shell.as_deref(), Some("sh"));
    }
}
