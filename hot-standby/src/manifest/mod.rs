//! Backup manifests.
//!
//! A manifest records every payload file of one backup, keyed by its path
//! relative to the backup's `data` directory, with a content checksum and
//! size. It is written as `backup.manifest` next to the `data` directory.

pub mod diff;

pub use diff::{compare, diff, ManifestDiff};

use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::errors::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path};

/// File name of the manifest inside a backup directory.
pub const MANIFEST_FILE: &str = "backup.manifest";

pub const MANIFEST_VERSION: u32 = 1;

/// Path to file metadata for one backup. Iteration is in key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub files: BTreeMap<String, ManifestEntry>,
}

/// Metadata for a single file in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub checksum: String,
    pub size: u64,
}

impl ManifestEntry {
    pub fn new(checksum: impl Into<String>, size: u64) -> Self {
        Self {
            checksum: checksum.into(),
            size,
        }
    }
}

fn default_version() -> u32 {
    MANIFEST_VERSION
}

impl Manifest {
    pub fn new(label: Option<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            label,
            created_at: Some(Utc::now()),
            files: BTreeMap::new(),
        }
    }

    /// Load a manifest file. Missing, unreadable or malformed files fail with
    /// [`SyncError::ManifestLoad`], and so does any key that is not a plain
    /// relative path.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SyncError::manifest_load(path, e))?;
        let manifest: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SyncError::manifest_load(path, e))?;

        if let Some(key) = manifest.files.keys().find(|key| !is_relative_key(key)) {
            return Err(SyncError::manifest_load(
                path,
                format!("invalid path {:?}", key),
            ));
        }

        Ok(manifest)
    }

    /// Write the manifest atomically (temporary file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("manifest.tmp");
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, self)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Build a manifest for every regular file and symlink below `data_dir`.
    pub fn from_directory(data_dir: &Path, label: Option<String>) -> Result<Self> {
        let mut manifest = Self::new(label);

        for file in walk_directory(data_dir, WalkOptions::default())? {
            let checksum = if file.is_symlink {
                let target = std::fs::read_link(&file.path)?;
                blake3::hash(target.to_string_lossy().as_bytes()).to_hex().to_string()
            } else {
                checksum_file(&file.path)?
            };
            manifest
                .files
                .insert(file.relative_key(), ManifestEntry::new(checksum, file.size));
        }

        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|e| e.size).sum()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

/// A key must stay below the directory it is joined to: non-empty, relative,
/// and made of normal components only.
fn is_relative_key(key: &str) -> bool {
    !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// BLAKE3 checksum of a file's content, hex encoded.
pub fn checksum_file(path: &Path) -> io::Result<String> {
    let mut reader = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut chunk = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
