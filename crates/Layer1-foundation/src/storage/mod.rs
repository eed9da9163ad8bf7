//! Storage module for berth
//!
//! - `json`: JSON settings files (global and per-project)

mod json;

pub use json::{load_file, JsonStore};
