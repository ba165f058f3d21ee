//! Hot Standby Library
//!
//! Keeps hot standby copies of a server's data directory in sync with its
//! latest backup, by applying manifest diffs or by a full resync.

pub mod backup;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod fs;
pub mod manifest;
pub mod standby;
pub mod utils;
pub mod workers;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use standby::{HotStandby, SyncReport, SyncRequest};
pub use utils::errors::{Result, SyncError};
