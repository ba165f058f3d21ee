//! Deterministic directory traversal.
//!
//! Entries are yielded in file-name order so that manifests and copy
//! fan-outs come out the same on every run.

use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking. Symlinks are never followed.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// Yield directories as well as files
    pub include_dirs: bool,
}

impl WalkOptions {
    /// Files and directories.
    pub fn tree() -> Self {
        Self { include_dirs: true }
    }
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Size in bytes (the link itself for symlinks)
    pub size: u64,

    pub is_dir: bool,

    pub is_symlink: bool,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_symlink: entry.path_is_symlink(),
        })
    }

    /// Relative path with `/` separators, as stored in manifests.
    pub fn relative_key(&self) -> String {
        relative_key(&self.relative_path)
    }
}

/// Join the normal components of `path` with `/`.
pub fn relative_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a directory tree below `root` (the root itself is not yielded).
///
/// Directories are only returned when `options.include_dirs` is set, and
/// always before their contents.
pub fn walk_directory(root: &Path, options: WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root).min_depth(1).sort_by_file_name();

    for entry in walker {
        let entry = entry?;

        if entry.file_type().is_dir() && !options.include_dirs {
            continue;
        }

        entries.push(FileInfo::from_entry(&entry, root)?);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), WalkOptions::default())?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_is_sorted_and_skips_dirs_by_default() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("base"))?;
        fs::write(temp_dir.path().join("zeta"), b"z")?;
        fs::write(temp_dir.path().join("base/16384"), b"page")?;
        fs::write(temp_dir.path().join("PG_VERSION"), b"17")?;

        let files = walk_directory(temp_dir.path(), WalkOptions::default())?;
        let keys: Vec<String> = files.iter().map(FileInfo::relative_key).collect();

        assert_eq!(keys, vec!["PG_VERSION", "base/16384", "zeta"]);
        assert_eq!(files[1].size, 4);
        Ok(())
    }

    #[test]
    fn test_walk_tree_yields_directories_first() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("pg_wal/archive_status"))?;
        fs::write(temp_dir.path().join("pg_wal/000000010000000000000001"), b"wal")?;

        let entries = walk_directory(temp_dir.path(), WalkOptions::tree())?;
        let keys: Vec<(String, bool)> = entries
            .iter()
            .map(|e| (e.relative_key(), e.is_dir))
            .collect();

        assert_eq!(
            keys,
            vec![
                ("pg_wal".to_string(), true),
                ("pg_wal/000000010000000000000001".to_string(), false),
                ("pg_wal/archive_status".to_string(), true),
            ]
        );
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_not_followed() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let outside = TempDir::new()?;
        fs::write(outside.path().join("secret"), b"x")?;
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("pg_tblspc"))?;

        let entries = walk_directory(temp_dir.path(), WalkOptions::tree())?;

        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_symlink);
        assert!(!entries[0].is_dir);
        Ok(())
    }

    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let path: PathBuf = ["base", "1", "1259"].iter().collect();
        assert_eq!(relative_key(&path), "base/1/1259");
    }
}
