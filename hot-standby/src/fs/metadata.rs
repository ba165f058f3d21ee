//! File metadata carried from a backup onto its hot standby copy.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io;
use std::path::Path;

/// What `copy_file` keeps from the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Unix mode bits
    pub mode: Option<u32>,
    pub is_dir: bool,
    pub is_symlink: bool,
    permissions: fs::Permissions,
}

impl FileMetadata {
    /// Read metadata without following a final symlink.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let mode = None;

        Ok(Self {
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            mode,
            is_dir: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
            permissions: metadata.permissions(),
        })
    }

    /// Set permissions and modification time on the regular file at `path`.
    pub fn apply_to_path(&self, path: &Path) -> io::Result<()> {
        if let Some(modified) = self.modified {
            File::options()
                .write(true)
                .open(path)?
                .set_modified(modified.into())?;
        }
        fs::set_permissions(path, self.permissions.clone())
    }
}
