//! # termtask-foundation
//!
//! Foundation layer for termtask:
//! - Error: shared `Error` / `Result`
//! - Storage: JsonStore (global + project settings)
//! - Config: EngineConfig
//! - Platform: OS detection, default shell, executable lookup
//! - Collections: LinkedMap (ordered map with touch semantics)

pub mod collections;
pub mod config;
pub mod error;
pub mod platform;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{EngineConfig, TerminalConfig, ENGINE_CONFIG_FILE};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{JsonStore, PROJECT_DIR};

// ============================================================================
// Platform / Collections
// ============================================================================
pub use collections::{LinkedMap, Touch};
pub use platform::{find_executable, Platform};
