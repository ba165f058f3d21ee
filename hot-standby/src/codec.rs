//! Compression codecs for backup payloads.
//!
//! The synchronizer treats compressed artifacts as opaque; codecs are only
//! needed when an incremental backup has to be materialized into a plain
//! file tree.

use crate::utils::errors::{Result, SyncError};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extension (without dot) carried by compressed files, if any.
    fn extension(&self) -> Option<&'static str>;

    fn compress_file(&self, from: &Path, to: &Path) -> Result<()>;

    fn decompress_file(&self, from: &Path, to: &Path) -> Result<()>;

    fn compress_string(&self, s: &str) -> Result<Vec<u8>>;

    fn decompress_string(&self, bytes: &[u8]) -> Result<String>;
}

/// Pick a codec by its configured name.
pub fn from_name(name: &str, level: i32) -> Result<Box<dyn Codec>> {
    match name.to_ascii_lowercase().as_str() {
        "zstd" | "zstandard" => Ok(Box::new(ZstdCodec::new(level))),
        "none" | "" => Ok(Box::new(NoCodec)),
        other => Err(SyncError::Config(format!(
            "unsupported compression: {}",
            other
        ))),
    }
}

fn open_pair(from: &Path, to: &Path) -> Result<(BufReader<File>, BufWriter<File>)> {
    let reader = BufReader::new(File::open(from)?);
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(to)?);
    Ok((reader, writer))
}

/// Zstandard codec.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(zstd::DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn extension(&self) -> Option<&'static str> {
        Some("zstd")
    }

    fn compress_file(&self, from: &Path, to: &Path) -> Result<()> {
        let (reader, mut writer) = open_pair(from, to)?;
        zstd::stream::copy_encode(reader, &mut writer, self.level).map_err(|e| {
            SyncError::Compression(format!("zstd compress {}: {}", from.display(), e))
        })?;
        writer.flush()?;
        Ok(())
    }

    fn decompress_file(&self, from: &Path, to: &Path) -> Result<()> {
        let (reader, mut writer) = open_pair(from, to)?;
        zstd::stream::copy_decode(reader, &mut writer).map_err(|e| {
            SyncError::Compression(format!("zstd decompress {}: {}", from.display(), e))
        })?;
        writer.flush()?;
        Ok(())
    }

    fn compress_string(&self, s: &str) -> Result<Vec<u8>> {
        zstd::encode_all(s.as_bytes(), self.level)
            .map_err(|e| SyncError::Compression(format!("zstd compress string: {}", e)))
    }

    fn decompress_string(&self, bytes: &[u8]) -> Result<String> {
        let raw = zstd::decode_all(bytes)
            .map_err(|e| SyncError::Compression(format!("zstd decompress string: {}", e)))?;
        String::from_utf8(raw).map_err(|e| SyncError::Compression(e.to_string()))
    }
}

/// Pass-through codec for uncompressed backups.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCodec;

impl Codec for NoCodec {
    fn name(&self) -> &'static str {
        "none"
    }

    fn extension(&self) -> Option<&'static str> {
        None
    }

    fn compress_file(&self, from: &Path, to: &Path) -> Result<()> {
        crate::fs::copy_file(from, to)?;
        Ok(())
    }

    fn decompress_file(&self, from: &Path, to: &Path) -> Result<()> {
        crate::fs::copy_file(from, to)?;
        Ok(())
    }

    fn compress_string(&self, s: &str) -> Result<Vec<u8>> {
        Ok(s.as_bytes().to_vec())
    }

    fn decompress_string(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| SyncError::Compression(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_name() {
        assert_eq!(from_name("zstd", 3).unwrap().name(), "zstd");
        assert_eq!(from_name("ZSTD", 3).unwrap().extension(), Some("zstd"));
        assert_eq!(from_name("none", 0).unwrap().extension(), None);
        assert!(matches!(from_name("lz4", 0), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_zstd_file_roundtrip() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let original = temp_dir.path().join("16384");
        let compressed = temp_dir.path().join("16384.zstd");
        let restored = temp_dir.path().join("restore/16384");

        let content = "relation page ".repeat(1000);
        fs::write(&original, &content)?;

        let codec = ZstdCodec::default();
        codec.compress_file(&original, &compressed)?;
        assert!(fs::metadata(&compressed)?.len() < content.len() as u64);

        codec.decompress_file(&compressed, &restored)?;
        assert_eq!(fs::read_to_string(&restored)?, content);
        Ok(())
    }

    #[test]
    fn test_zstd_string() -> anyhow::Result<()> {
        let codec = ZstdCodec::new(1);
        let bytes = codec.compress_string("{\"command\": \"backup\"}")?;
        assert_eq!(codec.decompress_string(&bytes)?, "{\"command\": \"backup\"}");

        assert!(matches!(
            codec.decompress_string(b"garbage"),
            Err(SyncError::Compression(_))
        ));
        Ok(())
    }

    #[test]
    fn test_zstd_decompress_corrupt_file_fails() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let bogus = temp_dir.path().join("bogus.zstd");
        fs::write(&bogus, b"not zstd at all")?;

        let result = ZstdCodec::default().decompress_file(&bogus, &temp_dir.path().join("out"));
        assert!(matches!(result, Err(SyncError::Compression(_))));
        Ok(())
    }
}
