// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable byte buffer with insert/delete at arbitrary offsets.
//!
//! [`IoBuf`] is the substrate of every connection's `recv` and `send`
//! queues and of the protocol encoders. Capacity grows in multiples of the
//! configured alignment (the manager passes [`crate::config::IO_SIZE`]),
//! append is amortized O(1), insert/delete at an interior offset is O(n).
//!
//! Allocation is fallible: growth goes through `try_reserve_exact` and
//! surfaces [`Error::OutOfMemory`] instead of aborting, so a hostile peer
//! cannot take the process down by forcing buffer growth.
//!
//! Any mutation may move the backing storage; slices obtained before a
//! mutating call must not be carried across it. The borrow checker enforces
//! this for safe callers, which is the point of routing all parser output
//! through borrowed views.

use crate::{Error, Result};
use std::ops::{Deref, DerefMut};

/// Resizable byte buffer supporting insert/delete at arbitrary offsets.
#[derive(Default)]
pub struct IoBuf {
    buf: Vec<u8>,
    align: usize,
}

impl IoBuf {
    /// Empty buffer with the default alignment granularity.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            align: crate::config::IO_SIZE,
        }
    }

    /// Empty buffer with an explicit alignment granularity.
    ///
    /// `align` of 0 is treated as 1 (no rounding).
    pub fn with_align(align: usize) -> Self {
        Self {
            buf: Vec::new(),
            align: align.max(1),
        }
    }

    /// Buffer pre-sized to `capacity` (rounded up to alignment).
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut b = Self::new();
        b.reserve_aligned(capacity)?;
        Ok(b)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Grow capacity to hold `total` bytes, rounded up to the alignment.
    fn reserve_aligned(&mut self, total: usize) -> Result<()> {
        if total <= self.buf.capacity() {
            return Ok(());
        }
        let target = total
            .checked_add(self.align - 1)
            .ok_or(Error::OutOfMemory)?
            / self.align
            * self.align;
        let additional = target - self.buf.len();
        self.buf
            .try_reserve_exact(additional)
            .map_err(|_| Error::OutOfMemory)
    }

    /// Set the length to `new_len`, zero-filling any extension.
    ///
    /// Resizing to 0 releases the backing memory entirely.
    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        if new_len == 0 {
            self.buf = Vec::new();
            return Ok(());
        }
        self.reserve_aligned(new_len)?;
        self.buf.resize(new_len, 0);
        Ok(())
    }

    /// Insert `data` at `offset`, shifting the tail right.
    ///
    /// An offset past the end is clamped to the end. Zero-length inserts
    /// are no-ops.
    pub fn insert(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let offset = offset.min(self.buf.len());
        self.reserve_aligned(self.buf.len() + data.len())?;
        // Splice via rotate: append then rotate the tail into place.
        let old_len = self.buf.len();
        self.buf.extend_from_slice(data);
        if offset < old_len {
            self.buf[offset..].rotate_right(data.len());
        }
        Ok(())
    }

    /// Append `data` at the end.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.insert(self.buf.len(), data)
    }

    /// Delete up to `count` bytes at `offset`, shifting the tail left.
    ///
    /// Returns the number of bytes actually removed (clamped to the
    /// available range). Deleting everything releases the backing memory.
    pub fn delete(&mut self, offset: usize, count: usize) -> usize {
        if offset >= self.buf.len() || count == 0 {
            return 0;
        }
        let count = count.min(self.buf.len() - offset);
        self.buf.drain(offset..offset + count);
        if self.buf.is_empty() {
            self.buf = Vec::new();
        }
        count
    }

    /// Drop all contents and release memory.
    pub fn clear(&mut self) {
        self.buf = Vec::new();
    }

    /// Take the contents out, leaving an empty buffer with the same
    /// alignment behind.
    pub(crate) fn take(&mut self) -> IoBuf {
        IoBuf {
            buf: std::mem::take(&mut self.buf),
            align: self.align,
        }
    }
}

impl Deref for IoBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for IoBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl std::fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBuf")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .field("align", &self.align)
            .finish()
    }
}
