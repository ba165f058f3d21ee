//! Growable buffers backing the streaming I/O paths.
//!
//! - [`Message`] is a fixed-size, reusable message buffer owned by a
//!   [`MemoryContext`] that each I/O session holds on its own.
//! - [`StreamBuffer`] is a growable buffer for variable-length I/O whose
//!   capacity is always a multiple of [`ALIGNMENT_SIZE`].
//! - [`append`] grows a dynamic byte vector by a tail slice.
//!
//! Alignment applies to capacities only: every size is a multiple of
//! [`ALIGNMENT_SIZE`], while the start address is whatever the global
//! allocator returns for a `Vec<u8>`.

pub mod message;
pub mod stream;

pub use message::{MemoryContext, Message};
pub use stream::{append, StreamBuffer};

use thiserror::Error;

/// Capacity of a message buffer and the default growth chunk of a stream buffer (128 KB).
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// Every buffer capacity (not address) is rounded up to a multiple of this.
pub const ALIGNMENT_SIZE: usize = 512;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("unable to allocate {requested} bytes")]
    Allocation { requested: usize },

    #[error("buffer of {size} bytes cannot grow by {needed} bytes")]
    Overflow { size: usize, needed: usize },

    #[error("memory context used before init or after destroy")]
    Uninitialized,

    #[error("payload of {len} bytes exceeds message capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },
}

/// Round `size` up to the next multiple of [`ALIGNMENT_SIZE`].
///
/// Returns `None` when the rounded value does not fit in `usize`.
pub fn aligned_size(size: usize) -> Option<usize> {
    size.checked_add(ALIGNMENT_SIZE - 1)
        .map(|s| s / ALIGNMENT_SIZE * ALIGNMENT_SIZE)
}

/// Allocate a zero-filled block of `size` bytes, reporting failure instead of aborting.
pub(crate) fn zeroed(size: usize) -> Result<Vec<u8>, BufferError> {
    let mut block = Vec::new();
    block
        .try_reserve_exact(size)
        .map_err(|_| BufferError::Allocation { requested: size })?;
    block.resize(size, 0);
    Ok(block)
}
