//! Capacity-bounded byte buffer
//!
//! Writes past the capacity are truncated, never grown and never reported as
//! errors: callers check the returned byte counts.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


/// Fixed-capacity byte buffer
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
    size: usize,
}

impl Buffer {
    /// Create an empty buffer able to hold `total` bytes
    pub fn new(total: usize) -> Self {
        Buffer {
            data: vec![0; total],
            size: 0,
        }
    }

    /// Reallocate to `total` bytes of capacity, discarding the contents
    pub fn resize(&mut self, total: usize) -> usize {
        self.data = vec![0; total];
        self.size = 0;
        total
    }

    /// Capacity in bytes
    pub fn total(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently held
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current contents
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Replace the contents with `src`, truncated to the capacity.
    ///
    /// Returns the number of bytes copied.
    pub fn put(&mut self, src: &[u8]) -> usize {
        let size = src.len().min(self.total());
        self.data[..size].copy_from_slice(&src[..size]);
        self.size = size;
        size
    }

    /// Append `src` after the current contents, truncated to the space left.
    ///
    /// Returns the number of bytes copied.
    pub fn append(&mut self, src: &[u8]) -> usize {
        let size = src.len().min(self.total() - self.size);
        self.data[self.size..self.size + size].copy_from_slice(&src[..size]);
        self.size += size;
        size
    }

    /// View of at most `size` bytes from the start of the contents
    pub fn read(&self, size: usize) -> &[u8] {
        &self.data[..size.min(self.size)]
    }

    /// Forget the contents, keeping the capacity
    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// Log the contents as a hex dump at debug level
    pub fn dump(&self, desc: &str) {
        broadcast_logging::dump_buffer(desc, self.as_slice(), " ", 16);
    }
}
