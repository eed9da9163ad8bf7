//! Config - berth settings
//!
//! - `berth.rs` - BerthConfig, RuntimeKind, layered loading

mod berth;

pub use berth::{
    BerthConfig, ConfigLayer, RuntimeKind, BERTH_CONFIG_FILE, DEFAULT_CODE_MOUNT_PATH,
    DEFAULT_HOME_PATH, DEFAULT_IMAGE, DEFAULT_LOG_CAPACITY,
};
