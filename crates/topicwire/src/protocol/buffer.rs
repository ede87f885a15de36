// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable read buffer for the protocol parser.
//!
//! ```text
//!  0          start           end            capacity
//!  +-----------+===============+--------------+
//!  | consumed  |   readable    |    spare     |
//!  +-----------+===============+--------------+
//! ```
//!
//! Reads land in the spare region, the parser consumes from the readable
//! region, and [`ReadBuffer::compact`] moves the unconsumed remainder back to
//! offset 0. Growth always compacts first, so partial frame bytes survive a
//! resize unchanged.

/// Contiguous byte buffer with read/write cursors.
#[derive(Debug)]
pub struct ReadBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl ReadBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity.max(1)],
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn readable(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.start += n.min(self.len());
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Free space after the readable region.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Mark `n` bytes written into [`ReadBuffer::spare_mut`] as readable.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.data.len());
        self.end = (self.end + n).min(self.data.len());
    }

    /// Copy as much of `bytes` as fits in the spare region.
    pub fn fill_from(&mut self, bytes: &[u8]) -> usize {
        let spare = self.spare_mut();
        let n = spare.len().min(bytes.len());
        spare[..n].copy_from_slice(&bytes[..n]);
        self.commit(n);
        n
    }

    /// Move unconsumed bytes to the front of the buffer.
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Ensure the buffer can hold `required` contiguous bytes.
    ///
    /// Returns `true` if the buffer was reallocated.
    pub fn ensure_capacity(&mut self, required: usize) -> bool {
        self.compact();
        if required <= self.data.len() {
            return false;
        }
        self.data.resize(required, 0);
        true
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}
