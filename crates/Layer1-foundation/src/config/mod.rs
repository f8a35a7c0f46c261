//! Config
//!
//! - `engine.rs` - EngineConfig (debounce, channel sizes, PTY defaults)

mod engine;

pub use engine::{EngineConfig, TerminalConfig, ENGINE_CONFIG_FILE};
