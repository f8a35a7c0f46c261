//! Storage module for termtask
//!
//! - `json`: JSON settings files (global + project)

mod json;

pub use json::{JsonStore, PROJECT_DIR};
