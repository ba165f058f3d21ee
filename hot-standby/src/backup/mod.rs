//! Backup catalog for one server.
//!
//! Layout below the server backup directory:
//!
//! ```text
//! <label>/backup.manifest
//! <label>/backup.info        (optional, names the parent of an incremental backup)
//! <label>/data/...
//! <label>/tblspc_<name>/...
//! ```
//!
//! Labels sort in time order, so the most recent backup is the last one.

pub mod extract;

pub use extract::{ChainExtractor, Extraction, Extractor};

use crate::manifest::MANIFEST_FILE;
use crate::utils::errors::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const BACKUP_INFO_FILE: &str = "backup.info";
pub const DATA_DIR: &str = "data";
pub const TABLESPACE_PREFIX: &str = "tblspc_";

/// Per-backup metadata stored in `backup.info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Label of the backup this one is an increment of
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl BackupInfo {
    pub fn incremental(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
        }
    }

    pub fn save(&self, backup_root: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(backup_root.join(BACKUP_INFO_FILE), content)?;
        Ok(())
    }
}

/// One retained backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub label: String,
    pub root: PathBuf,
    pub info: BackupInfo,
}

impl Backup {
    /// Read the backup rooted at `root`; the label is the directory name.
    pub fn load(root: PathBuf) -> Result<Self> {
        let label = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SyncError::Config(format!("invalid backup path {}", root.display())))?;

        let info_path = root.join(BACKUP_INFO_FILE);
        let info = if info_path.is_file() {
            serde_json::from_str(&std::fs::read_to_string(&info_path)?)?
        } else {
            BackupInfo::default()
        };

        Ok(Self { label, root, info })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn is_incremental(&self) -> bool {
        self.info.parent.is_some()
    }
}

/// Payload directory of tablespace `name` inside a backup (or extracted) root.
pub fn tablespace_dir(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{}{}", TABLESPACE_PREFIX, name))
}

/// List the backups in `dir`, oldest first.
///
/// Any subdirectory with a `data` directory counts as a backup. Backups
/// whose `backup.info` cannot be read are skipped with a warning.
pub fn list_backups(dir: &Path) -> Result<Vec<Backup>> {
    let mut backups = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.join(DATA_DIR).is_dir() {
            continue;
        }

        match Backup::load(path) {
            Ok(backup) => backups.push(backup),
            Err(e) => warn!("Skipping backup: {}", e),
        }
    }

    backups.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(backups)
}

/// Follow parent links from `label` down to its full backup.
///
/// Returns the chain oldest first, ending with `label` itself.
pub fn resolve_chain(dir: &Path, label: &str) -> Result<Vec<Backup>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(label.to_string());

    while let Some(current) = next {
        if !seen.insert(current.clone()) {
            return Err(SyncError::Extraction(format!(
                "backup chain of {} loops at {}",
                label, current
            )));
        }

        let root = dir.join(&current);
        if !root.join(DATA_DIR).is_dir() {
            return Err(SyncError::Extraction(format!(
                "backup {} in the chain of {} is missing",
                current, label
            )));
        }

        let backup = Backup::load(root)?;
        next = backup.info.parent.clone();
        chain.push(backup);
    }

    chain.reverse();
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_backup(dir: &Path, label: &str, parent: Option<&str>) -> Result<()> {
        let root = dir.join(label);
        fs::create_dir_all(root.join(DATA_DIR))?;
        if let Some(parent) = parent {
            BackupInfo::incremental(parent).save(&root)?;
        }
        Ok(())
    }

    #[test]
    fn test_list_backups_sorted_by_label() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        create_backup(temp_dir.path(), "20250103000000", Some("20250102000000"))?;
        create_backup(temp_dir.path(), "20250101000000", None)?;
        create_backup(temp_dir.path(), "20250102000000", None)?;
        fs::create_dir(temp_dir.path().join("not-a-backup"))?;
        fs::write(temp_dir.path().join("stray-file"), b"x")?;

        let backups = list_backups(temp_dir.path())?;
        let labels: Vec<&str> = backups.iter().map(|b| b.label.as_str()).collect();

        assert_eq!(labels, vec!["20250101000000", "20250102000000", "20250103000000"]);
        assert!(!backups[0].is_incremental());
        assert!(backups[2].is_incremental());
        assert_eq!(backups[2].info.parent.as_deref(), Some("20250102000000"));
        Ok(())
    }

    #[test]
    fn test_list_backups_of_missing_dir_fails() {
        assert!(list_backups(Path::new("/nonexistent/hot-standby/backups")).is_err());
    }

    #[test]
    fn test_backup_paths() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        create_backup(temp_dir.path(), "20250314092653", None)?;

        let backup = Backup::load(temp_dir.path().join("20250314092653"))?;
        assert_eq!(backup.data_dir(), temp_dir.path().join("20250314092653/data"));
        assert_eq!(
            backup.manifest_path(),
            temp_dir.path().join("20250314092653/backup.manifest")
        );
        assert_eq!(
            tablespace_dir(&backup.root, "fast"),
            temp_dir.path().join("20250314092653/tblspc_fast")
        );
        Ok(())
    }

    #[test]
    fn test_resolve_chain() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        create_backup(temp_dir.path(), "001", None)?;
        create_backup(temp_dir.path(), "002", Some("001"))?;
        create_backup(temp_dir.path(), "003", Some("002"))?;

        let chain = resolve_chain(temp_dir.path(), "003")?;
        let labels: Vec<&str> = chain.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["001", "002", "003"]);

        let single = resolve_chain(temp_dir.path(), "001")?;
        assert_eq!(single.len(), 1);
        Ok(())
    }

    #[test]
    fn test_resolve_chain_errors() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        create_backup(temp_dir.path(), "002", Some("001"))?;
        assert!(matches!(
            resolve_chain(temp_dir.path(), "002"),
            Err(SyncError::Extraction(_))
        ));

        create_backup(temp_dir.path(), "010", Some("011"))?;
        create_backup(temp_dir.path(), "011", Some("010"))?;
        assert!(matches!(
            resolve_chain(temp_dir.path(), "011"),
            Err(SyncError::Extraction(_))
        ));
        Ok(())
    }
}
