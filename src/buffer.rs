// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Bounded receive buffer

/// Default receive buffer size
pub const DEFAULT_CAPACITY: usize = 2048;

const MIN_CAPACITY: usize = 4;

/// Accumulates device output until it can be classified.
///
/// The buffer never holds more than `capacity` bytes. When the free tail
/// drops below a quarter of the capacity the oldest bytes are dropped so the
/// newest three quarters move to the front.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ReceiveBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        ReceiveBuffer {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free bytes left at the tail
    pub fn spare(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Drop the oldest bytes if the free tail is below a quarter of the
    /// capacity. Returns how many bytes were dropped.
    pub fn make_room(&mut self) -> usize {
        if self.spare() >= self.capacity / 4 {
            return 0;
        }
        let keep = self.capacity * 3 / 4;
        let dropped = self.data.len() - keep;
        self.data.drain(..dropped);
        log::trace!("Receive buffer full, dropped {} oldest bytes", dropped);
        dropped
    }

    /// Hand the free tail to `read` and keep the bytes it reports.
    pub fn fill<F>(&mut self, read: F) -> std::io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> std::io::Result<usize>,
    {
        let start = self.data.len();
        self.data.resize(self.capacity, 0);
        match read(&mut self.data[start..]) {
            Ok(n) => {
                let n = n.min(self.capacity - start);
                self.data.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.data.truncate(start);
                Err(e)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
