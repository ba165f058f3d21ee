//! Filesystem traversal and primitives used by the worker jobs.

pub mod metadata;
pub mod ops;
pub mod walker;

pub use ops::{copy_file, copy_tree, delete_directory, delete_file, exists, is_directory, mkdir};
pub use metadata::FileMetadata;
pub use walker::{walk_directory, FileInfo, WalkOptions};
