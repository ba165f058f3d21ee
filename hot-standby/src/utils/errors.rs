//! Custom error types for the hot standby synchronizer.

use crate::buffer::BufferError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to load manifest {}: {reason}", path.display())]
    ManifestLoad { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Worker error: {0}")]
    Workers(String),

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("No backups found for server: {0}")]
    NoBackups(String),

    #[error("Hot standby incomplete: {failed}/{total} directories failed")]
    StandbyIncomplete { failed: usize, total: usize },
}

impl SyncError {
    pub(crate) fn manifest_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SyncError::ManifestLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
