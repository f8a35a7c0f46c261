//! Collections

mod linked_map;

pub use linked_map::{LinkedMap, Touch};
