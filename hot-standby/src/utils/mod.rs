//! Utility modules for the hot standby synchronizer.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{Result, SyncError};
