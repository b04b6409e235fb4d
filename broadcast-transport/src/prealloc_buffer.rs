//! Preallocated read/write cursor buffer
//!
//! Bytes are written at the write cursor and consumed from the read cursor.
//! Once everything written has been read, both cursors jump back to the start
//! so the whole region is writable again.
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


use tracing::debug;

/// Contiguous byte region with independent read and write offsets
///
/// Invariant: `read_offset <= write_offset <= capacity`.
#[derive(Debug)]
pub struct PreallocBuffer {
    region: Vec<u8>,
    read_offset: usize,
    write_offset: usize,
}

impl PreallocBuffer {
    /// Create a buffer with `capacity` bytes of writable space
    pub fn new(capacity: usize) -> Self {
        PreallocBuffer {
            region: vec![0; capacity],
            read_offset: 0,
            write_offset: 0,
        }
    }

    /// Capacity of the backing region
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes written but not yet read
    pub fn available_bytes(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// Bytes that can be written before the region is full
    pub fn available_space(&self) -> usize {
        self.region.len() - self.write_offset
    }

    /// Unread bytes
    pub fn read_buffer(&self) -> &[u8] {
        &self.region[self.read_offset..self.write_offset]
    }

    /// Writable space; commit with [`PreallocBuffer::did_write`]
    pub fn write_buffer(&mut self) -> &mut [u8] {
        &mut self.region[self.write_offset..]
    }

    /// Grow the region so that at least `bytes` can be written.
    ///
    /// The region grows by exactly the shortfall. Cursor offsets are kept.
    pub fn ensure_capacity_for_write(&mut self, bytes: usize) {
        let available_space = self.available_space();
        if bytes > available_space {
            let additional = bytes - available_space;
            self.region.resize(self.region.len() + additional, 0);
        }
    }

    /// Copy `src` into the write space, growing if needed, and commit it
    pub fn write(&mut self, src: &[u8]) {
        self.ensure_capacity_for_write(src.len());
        self.write_buffer()[..src.len()].copy_from_slice(src);
        self.did_write(src.len());
    }

    /// Commit `bytes` written into [`PreallocBuffer::write_buffer`].
    ///
    /// # Panics
    ///
    /// Panics if the write cursor would pass the end of the region.
    pub fn did_write(&mut self, bytes: usize) {
        assert!(
            bytes <= self.available_space(),
            "did_write({}) past the end of the region ({} bytes left)",
            bytes,
            self.available_space()
        );
        self.write_offset += bytes;
    }

    /// Mark `bytes` from [`PreallocBuffer::read_buffer`] as consumed.
    ///
    /// # Panics
    ///
    /// Panics if the read cursor would pass the write cursor.
    pub fn did_read(&mut self, bytes: usize) {
        assert!(
            bytes <= self.available_bytes(),
            "did_read({}) past the write cursor ({} bytes unread)",
            bytes,
            self.available_bytes()
        );
        self.read_offset += bytes;

        if self.read_offset == self.write_offset {
            self.reset();
        }
    }

    /// Move both cursors back to the start, dropping unread bytes
    pub fn reset(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;
    }

    pub fn dump_info(&self) {
        debug!(
            capacity = self.region.len(),
            write_offset = self.write_offset,
            available_space = self.available_space(),
            read_offset = self.read_offset,
            available_bytes = self.available_bytes(),
            "PreallocBuffer state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_write_then_read() {
        let mut buffer = PreallocBuffer::new(16);
        buffer.write(b"hello");
        assert_eq!(buffer.available_bytes(), 5);
        assert_eq!(buffer.available_space(), 11);
        assert_eq!(buffer.read_buffer(), b"hello");

        buffer.did_read(2);
        assert_eq!(buffer.read_buffer(), b"llo");
    }

    #[test]
    fn test_cursors_reset_when_drained() {
        let mut buffer = PreallocBuffer::new(8);
        buffer.write(b"abcdef");
        buffer.did_read(6);
        assert_eq!(buffer.available_bytes(), 0);
        assert_eq!(buffer.available_space(), 8);
    }

    #[test]
    fn test_growth_keeps_cursor_offsets() {
        let mut buffer = PreallocBuffer::new(8);
        buffer.write(b"abcdef");
        buffer.did_read(2);

        buffer.ensure_capacity_for_write(10);
        // Shortfall was 10 - 2 = 8
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.available_space(), 10);
        assert_eq!(buffer.read_buffer(), b"cdef");
    }

    #[test]
    fn test_ensure_capacity_noop_when_space_suffices() {
        let mut buffer = PreallocBuffer::new(8);
        buffer.ensure_capacity_for_write(8);
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn test_write_buffer_commit() {
        let mut buffer = PreallocBuffer::new(4);
        buffer.write_buffer()[..3].copy_from_slice(b"xyz");
        buffer.did_write(3);
        assert_eq!(buffer.read_buffer(), b"xyz");
    }

    #[test]
    #[should_panic(expected = "past the write cursor")]
    fn test_read_past_write_cursor_panics() {
        let mut buffer = PreallocBuffer::new(4);
        buffer.write(b"ab");
        buffer.did_read(3);
    }

    #[test]
    #[should_panic(expected = "past the end of the region")]
    fn test_write_past_region_panics() {
        let mut buffer = PreallocBuffer::new(4);
        buffer.did_write(5);
    }

    #[test]
    fn test_random_cursor_walk() {
        let mut rng = rand::thread_rng();
        let mut buffer = PreallocBuffer::new(32);
        for _ in 0..1_000 {
            if rng.gen_bool(0.5) {
                let n = rng.gen_range(0..=buffer.available_space());
                buffer.did_write(n);
            } else {
                let n = rng.gen_range(0..=buffer.available_bytes());
                buffer.did_read(n);
                if buffer.available_bytes() == 0 {
                    assert_eq!(buffer.available_space(), buffer.capacity());
                }
            }
            assert!(buffer.available_bytes() + buffer.available_space() <= buffer.capacity());
        }
    }
}
