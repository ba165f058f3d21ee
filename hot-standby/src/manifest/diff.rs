//! Manifest comparison.
//!
//! Splits two snapshots into three disjoint key sets:
//!
//! - `deleted` = keys(old) - keys(new)
//! - `added`   = keys(new) - keys(old)
//! - `changed` = keys present in both whose checksums differ
//!
//! Keys present in both with equal checksums are unchanged and not stored.

use super::{Manifest, ManifestEntry};
use crate::utils::errors::Result;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Result of comparing an old manifest against a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Entries from the old manifest that are gone
    pub deleted: BTreeMap<String, ManifestEntry>,
    /// Entries from the new manifest whose content changed
    pub changed: BTreeMap<String, ManifestEntry>,
    /// Entries only in the new manifest
    pub added: BTreeMap<String, ManifestEntry>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.changed.is_empty() && self.added.is_empty()
    }

    /// Paths that must be copied from the new snapshot, in key order.
    pub fn to_copy(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.changed.iter().chain(self.added.iter())
    }

    pub fn bytes_to_copy(&self) -> u64 {
        self.to_copy().map(|(_, e)| e.size).sum()
    }
}

/// Compare two in-memory manifests.
pub fn diff(old: &Manifest, new: &Manifest) -> ManifestDiff {
    let mut result = ManifestDiff::default();

    for (path, old_entry) in &old.files {
        match new.files.get(path) {
            None => {
                result.deleted.insert(path.clone(), old_entry.clone());
            }
            Some(new_entry) if new_entry.checksum != old_entry.checksum => {
                result.changed.insert(path.clone(), new_entry.clone());
            }
            Some(_) => {}
        }
    }

    for (path, new_entry) in &new.files {
        if !old.files.contains_key(path) {
            result.added.insert(path.clone(), new_entry.clone());
        }
    }

    result
}

/// Load two manifest files and compare them.
///
/// Fails without a partial result when either manifest cannot be loaded.
pub fn compare(old_manifest: &Path, new_manifest: &Path) -> Result<ManifestDiff> {
    let old = Manifest::load(old_manifest)?;
    let new = Manifest::load(new_manifest)?;

    let result = diff(&old, &new);
    debug!(
        old = %old_manifest.display(),
        new = %new_manifest.display(),
        deleted = result.deleted.len(),
        changed = result.changed.len(),
        added = result.added.len(),
        "Compared manifests"
    );

    Ok(result)
}
