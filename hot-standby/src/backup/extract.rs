//! Materialization of incremental backups into a plain file tree.

use super::{resolve_chain, DATA_DIR, TABLESPACE_PREFIX};
use crate::codec::Codec;
use crate::fs::ops;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::manifest::Manifest;
use crate::utils::errors::{Result, SyncError};
use std::ffi::OsStr;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info};

/// Something that can turn a backup label into a complete, consistent image.
pub trait Extractor: Send + Sync {
    /// Materialize `label` from `backups_dir` into a new temporary root
    /// below `workspace`.
    fn extract(&self, backups_dir: &Path, label: &str, workspace: &Path) -> Result<Extraction>;
}

/// A materialized backup image. The temporary root is removed on drop.
#[derive(Debug)]
pub struct Extraction {
    dir: TempDir,
}

impl Extraction {
    pub fn new(dir: TempDir) -> Self {
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Rebuilds an incremental backup by layering its chain, oldest first.
///
/// Files carrying the codec's extension are decompressed on the way. Once
/// every layer is applied, data files the target manifest does not list
/// are removed.
pub struct ChainExtractor {
    codec: Box<dyn Codec>,
}

impl ChainExtractor {
    pub fn new(codec: Box<dyn Codec>) -> Self {
        Self { codec }
    }

    fn overlay(&self, from: &Path, to: &Path) -> Result<()> {
        ops::mkdir(to)?;

        for entry in walk_directory(from, WalkOptions::tree())? {
            let target = to.join(&entry.relative_path);
            if entry.is_dir {
                ops::mkdir(&target)?;
                continue;
            }

            match self.codec.extension() {
                Some(ext) if !entry.is_symlink && entry.path.extension() == Some(OsStr::new(ext)) => {
                    self.codec.decompress_file(&entry.path, &target.with_extension(""))?;
                }
                _ => {
                    ops::copy_file(&entry.path, &target)?;
                }
            }
        }

        Ok(())
    }
}

impl Extractor for ChainExtractor {
    fn extract(&self, backups_dir: &Path, label: &str, workspace: &Path) -> Result<Extraction> {
        let chain = resolve_chain(backups_dir, label)?;
        let target = chain
            .last()
            .ok_or_else(|| SyncError::Extraction(format!("empty backup chain for {}", label)))?;

        let manifest = Manifest::load(&target.manifest_path())?;

        ops::mkdir(workspace)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("hot-standby-{}-", label))
            .tempdir_in(workspace)?;

        for backup in &chain {
            debug!(label = %backup.label, root = %dir.path().display(), "Applying backup layer");

            for entry in std::fs::read_dir(&backup.root)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if (name != DATA_DIR && !name.starts_with(TABLESPACE_PREFIX)) || !entry.path().is_dir() {
                    continue;
                }
                self.overlay(&entry.path(), &dir.path().join(name.as_ref()))?;
            }
        }

        let data_dir = dir.path().join(DATA_DIR);
        let mut pruned = 0usize;
        for file in walk_directory(&data_dir, WalkOptions::default())? {
            if !manifest.contains(&file.relative_key()) {
                ops::delete_file(&file.path)?;
                pruned += 1;
            }
        }

        info!(
            "Extracted backup {} from {} layer(s) into {} ({} stale files removed)",
            label,
            chain.len(),
            dir.path().display(),
            pruned
        );

        Ok(Extraction::new(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupInfo;
    use crate::codec::{NoCodec, ZstdCodec};
    use std::fs;

    fn write_backup(
        backups_dir: &Path,
        label: &str,
        parent: Option<&str>,
        files: &[(&str, &str)],
        manifest_of: &[(&str, &str)],
    ) -> anyhow::Result<()> {
        let root = backups_dir.join(label);
        let data = root.join(DATA_DIR);
        fs::create_dir_all(&data)?;
        for (path, content) in files {
            let target = data.join(path);
            fs::create_dir_all(target.parent().unwrap())?;
            fs::write(target, content)?;
        }
        if let Some(parent) = parent {
            BackupInfo::incremental(parent).save(&root)?;
        }

        let image = TempDir::new()?;
        for (path, content) in manifest_of {
            let target = image.path().join(path);
            fs::create_dir_all(target.parent().unwrap())?;
            fs::write(target, content)?;
        }
        Manifest::from_directory(image.path(), Some(label.to_string()))?
            .save(&root.join(crate::manifest::MANIFEST_FILE))?;
        Ok(())
    }

    #[test]
    fn test_extract_layers_chain_and_prunes() -> anyhow::Result<()> {
        let backups = TempDir::new()?;
        let workspace = TempDir::new()?;
        let image = [("base/1", "one"), ("base/2", "two v2"), ("base/3", "three")];

        write_backup(
            backups.path(),
            "001",
            None,
            &[("base/1", "one"), ("base/2", "two"), ("base/gone", "old")],
            &[("base/1", "one"), ("base/2", "two"), ("base/gone", "old")],
        )?;

        // The increment stores base/2 compressed
        let staging = TempDir::new()?;
        fs::write(staging.path().join("2"), "two v2")?;
        write_backup(backups.path(), "002", Some("001"), &[("base/3", "three")], &image)?;
        ZstdCodec::default().compress_file(
            &staging.path().join("2"),
            &backups.path().join("002/data/base/2.zstd"),
        )?;

        let extractor = ChainExtractor::new(Box::new(ZstdCodec::default()));
        let extraction = extractor.extract(backups.path(), "002", workspace.path())?;
        let data = extraction.root().join(DATA_DIR);

        assert_eq!(fs::read_to_string(data.join("base/1"))?, "one");
        assert_eq!(fs::read_to_string(data.join("base/2"))?, "two v2");
        assert_eq!(fs::read_to_string(data.join("base/3"))?, "three");
        assert!(!data.join("base/gone").exists());
        assert!(!data.join("base/2.zstd").exists());

        let root = extraction.root().to_path_buf();
        assert!(root.starts_with(workspace.path()));
        drop(extraction);
        assert!(!root.exists());
        Ok(())
    }

    #[test]
    fn test_extract_copies_tablespaces() -> anyhow::Result<()> {
        let backups = TempDir::new()?;
        let workspace = TempDir::new()?;
        write_backup(backups.path(), "001", None, &[("PG_VERSION", "17")], &[("PG_VERSION", "17")])?;
        let tblspc = backups.path().join("001/tblspc_fast/PG_17");
        fs::create_dir_all(&tblspc)?;
        fs::write(tblspc.join("16390"), "rows")?;

        let extraction = ChainExtractor::new(Box::new(NoCodec)).extract(
            backups.path(),
            "001",
            workspace.path(),
        )?;

        assert_eq!(
            fs::read_to_string(extraction.root().join("tblspc_fast/PG_17/16390"))?,
            "rows"
        );
        Ok(())
    }

    #[test]
    fn test_extract_without_manifest_fails() -> anyhow::Result<()> {
        let backups = TempDir::new()?;
        let workspace = TempDir::new()?;
        fs::create_dir_all(backups.path().join("001").join(DATA_DIR))?;

        let result = ChainExtractor::new(Box::new(NoCodec)).extract(
            backups.path(),
            "001",
            workspace.path(),
        );

        assert!(matches!(result, Err(SyncError::ManifestLoad { .. })));
        assert_eq!(fs::read_dir(workspace.path())?.count(), 0);
        Ok(())
    }
}
