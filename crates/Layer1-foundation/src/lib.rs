//! # berth-foundation
//!
//! Foundation layer for berth:
//! - Error: the shared error taxonomy and `Result` alias
//! - Config: layered settings (`BerthConfig`)
//! - Storage: JSON settings files (`JsonStore`)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    BerthConfig, ConfigLayer, RuntimeKind, BERTH_CONFIG_FILE, DEFAULT_CODE_MOUNT_PATH,
    DEFAULT_HOME_PATH, DEFAULT_IMAGE, DEFAULT_LOG_CAPACITY,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{load_file, JsonStore};
