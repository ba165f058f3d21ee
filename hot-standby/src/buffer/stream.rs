//! Growable stream buffer and dynamic append.

use super::{aligned_size, zeroed, BufferError, ALIGNMENT_SIZE, DEFAULT_BUFFER_SIZE};
use std::io::{self, Read, Write};

/// A growable, alignment-backed byte buffer for streaming I/O.
///
/// Layout invariant: `0 <= start <= cursor <= end <= size`, where
/// `[start, cursor)` is the part of the current frame already consumed,
/// `[cursor, end)` is readable data, and `[end, size)` is free space.
/// The capacity is always a multiple of [`ALIGNMENT_SIZE`] and never shrinks.
#[derive(Debug)]
pub struct StreamBuffer {
    buffer: Vec<u8>,
    start: usize,
    end: usize,
    cursor: usize,
}

impl StreamBuffer {
    /// Create a buffer with the default capacity.
    pub fn new() -> Result<Self, BufferError> {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a buffer holding at least `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        let size = aligned_size(capacity.max(ALIGNMENT_SIZE)).ok_or(BufferError::Overflow {
            size: 0,
            needed: capacity,
        })?;

        Ok(Self {
            buffer: zeroed(size)?,
            start: 0,
            end: 0,
            cursor: 0,
        })
    }

    /// Capacity in bytes.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The whole storage, including free space.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes written but not yet consumed.
    pub fn readable(&self) -> &[u8] {
        &self.buffer[self.cursor..self.end]
    }

    /// Bytes of the current frame consumed so far.
    pub fn frame(&self) -> &[u8] {
        &self.buffer[self.start..self.cursor]
    }

    /// Free space after `end`.
    pub fn remaining(&self) -> usize {
        self.size() - self.end
    }

    /// Grow the capacity by at least `bytes_needed`.
    ///
    /// The new capacity is the aligned value of
    /// `max(size + bytes_needed, size + DEFAULT_BUFFER_SIZE)`. Existing
    /// content in `[0, size)` is preserved and the tail is zero-filled.
    /// On error the buffer is left exactly as it was.
    pub fn enlarge(&mut self, bytes_needed: usize) -> Result<(), BufferError> {
        let size = self.size();
        let overflow = BufferError::Overflow {
            size,
            needed: bytes_needed,
        };

        let new_size = size
            .checked_add(bytes_needed.max(DEFAULT_BUFFER_SIZE))
            .and_then(aligned_size)
            .ok_or(overflow.clone())?;

        if new_size <= size {
            return Err(overflow);
        }

        let mut grown = zeroed(new_size)?;
        grown[..size].copy_from_slice(&self.buffer);
        self.buffer = grown;

        Ok(())
    }

    /// Make room for `additional` bytes after `end`, growing if needed.
    pub fn reserve(&mut self, additional: usize) -> Result<(), BufferError> {
        let free = self.remaining();
        if free < additional {
            self.enlarge(additional - free)?;
        }
        Ok(())
    }

    /// Append `data` after `end`.
    pub fn write(&mut self, data: &[u8]) -> Result<(), BufferError> {
        self.reserve(data.len())?;
        self.buffer[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
        Ok(())
    }

    /// Mark `n` readable bytes as consumed.
    pub fn advance(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.end);
    }

    /// Start a new frame at the cursor.
    pub fn mark(&mut self) {
        self.start = self.cursor;
    }

    /// Move the current frame to the front of the storage.
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.buffer.copy_within(self.start..self.end, 0);
        self.cursor -= self.start;
        self.end -= self.start;
        self.start = 0;
    }

    /// Forget all content. Capacity is kept.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
        self.cursor = 0;
    }

    /// Read once from `reader` into the free space, compacting or growing
    /// first when the buffer is full. Returns the number of bytes read.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.remaining() == 0 {
            self.compact();
        }
        if self.remaining() == 0 {
            self.enlarge(ALIGNMENT_SIZE)
                .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        }

        let n = reader.read(&mut self.buffer[self.end..])?;
        self.end += n;
        Ok(n)
    }

    /// Write all readable bytes to `writer` and reset the buffer.
    pub fn drain_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let n = self.end - self.cursor;
        writer.write_all(self.readable())?;
        self.clear();
        Ok(n)
    }
}

/// Append `extra` to the tail of `buffer`, returning the new length.
///
/// An empty `extra` is a no-op: no reallocation happens and the length is
/// returned unchanged. On allocation failure `buffer` is untouched.
pub fn append(buffer: &mut Vec<u8>, extra: &[u8]) -> Result<usize, BufferError> {
    if extra.is_empty() {
        return Ok(buffer.len());
    }

    buffer
        .try_reserve_exact(extra.len())
        .map_err(|_| BufferError::Allocation {
            requested: buffer.len().saturating_add(extra.len()),
        })?;
    buffer.extend_from_slice(extra);

    Ok(buffer.len())
}
