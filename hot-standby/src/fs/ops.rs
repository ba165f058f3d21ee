//! Synchronous filesystem primitives.
//!
//! Failures surface as `io::Error`; the worker pool turns them into the
//! aggregate job outcome.

use super::metadata::FileMetadata;
use super::walker::{walk_directory, WalkOptions};
use crate::buffer::StreamBuffer;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Does anything (including a dangling symlink) exist at `path`?
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn is_directory(path: &Path) -> bool {
    path.is_dir()
}

/// Create `path` and any missing parents.
pub fn mkdir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Delete a file or symlink. Returns `Ok(false)` when nothing was there.
pub fn delete_file(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete a directory tree. Returns `Ok(false)` when nothing was there.
pub fn delete_directory(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Copy one file, replacing `to` and creating its parent directories.
///
/// Content is written to a temporary sibling that is renamed over `to`, so
/// a read-only or symlinked target is replaced rather than written through.
/// Symlinks are recreated as symlinks on Unix. Permission bits and the
/// modification time are carried over. Returns the number of bytes copied.
pub fn copy_file(from: &Path, to: &Path) -> io::Result<u64> {
    let metadata = FileMetadata::from_path(from)?;

    let parent = match to.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    if metadata.is_symlink {
        return copy_symlink(from, to);
    }

    let mut reader = File::open(from)?;
    let mut writer = tempfile::Builder::new()
        .prefix(".hot-standby-")
        .tempfile_in(parent)?;
    let mut buffer =
        StreamBuffer::new().map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;

    let mut copied = 0u64;
    while buffer.fill_from(&mut reader)? > 0 {
        copied += buffer.drain_to(&mut writer)? as u64;
    }
    writer.flush()?;

    metadata.apply_to_path(writer.path())?;
    writer.persist(to).map_err(|e| e.error)?;

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<u64> {
    let target = fs::read_link(from)?;
    delete_file(to)?;
    std::os::unix::fs::symlink(target, to)?;
    Ok(0)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<u64> {
    fs::copy(from, to)
}

/// Recursively copy the contents of `from` into `to` on the calling thread.
pub fn copy_tree(from: &Path, to: &Path) -> io::Result<u64> {
    mkdir(to)?;

    let mut copied = 0u64;
    for entry in walk_directory(from, WalkOptions::tree())? {
        let target = to.join(&entry.relative_path);
        if entry.is_dir {
            mkdir(&target)?;
        } else {
            copied += copy_file(&entry.path, &target)?;
        }
    }

    Ok(copied)
}
