//! Bit-level readers and writers
//!
//! [`GetBits`] and [`PutBits`] treat memory as a big-endian bit stream. They
//! are the building blocks for codec header parsing (see [`crate::nal_type`])
//! and for writing bit-packed protocol fields.
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


use tracing::error;

/// Largest bit count a single [`GetBits::get_bits`] call can return
pub const MAX_GET_BITS: u32 = 25;

/// Big-endian bit reader over a byte slice
///
/// Bytes past the end of the slice read as zero.
#[derive(Debug, Clone)]
pub struct GetBits<'a> {
    buffer: &'a [u8],
    index: usize,
}

impl<'a> GetBits<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        GetBits { buffer, index: 0 }
    }

    /// Read `n` bits (1..=25) and advance the bit cursor
    pub fn get_bits(&mut self, n: u32) -> u32 {
        debug_assert!((1..=MAX_GET_BITS).contains(&n), "get_bits({}) out of range", n);
        let word = self.window(self.index >> 3);
        let value = (word << (self.index & 7)) >> (32 - n);
        self.index += n as usize;
        value
    }

    /// Advance the bit cursor without reading
    pub fn skip_bits(&mut self, n: usize) {
        self.index += n;
    }

    /// Bits consumed so far
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bits left before the end of the slice
    pub fn bits_left(&self) -> usize {
        (self.buffer.len() * 8).saturating_sub(self.index)
    }

    fn window(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        if offset < self.buffer.len() {
            let end = (offset + 4).min(self.buffer.len());
            bytes[..end - offset].copy_from_slice(&self.buffer[offset..end]);
        }
        u32::from_be_bytes(bytes)
    }
}

/// Big-endian bit writer into a fixed-capacity byte slice
///
/// Bits accumulate in a 32-bit shift register that is written out whole once
/// full. Call [`PutBits::flush`] to write the trailing partial word.
#[derive(Debug)]
pub struct PutBits<'a> {
    buffer: &'a mut [u8],
    position: usize,
    bit_buf: u32,
    bit_left: u32,
}

impl<'a> PutBits<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        PutBits {
            buffer,
            position: 0,
            bit_buf: 0,
            bit_left: 32,
        }
    }

    /// Append the low `n` bits (0..=31) of `value`
    pub fn put_bits(&mut self, n: u32, value: u32) {
        debug_assert!(n < 32, "put_bits({}) out of range", n);
        debug_assert!(n == 0 || value >> n == 0, "value {:#x} wider than {} bits", value, n);

        if n < self.bit_left {
            self.bit_buf = (self.bit_buf << n) | value;
            self.bit_left -= n;
        } else {
            // bit_left < 32 here, so the shift is in range
            self.bit_buf <<= self.bit_left;
            self.bit_buf |= value >> (n - self.bit_left);
            self.write_word(self.bit_buf);
            self.bit_left += 32 - n;
            self.bit_buf = value;
        }
    }

    /// Pad the pending bits with zeros to a byte boundary and write them
    pub fn flush(&mut self) {
        if self.bit_left < 32 {
            self.bit_buf <<= self.bit_left;
        }
        while self.bit_left < 32 {
            let byte = (self.bit_buf >> 24) as u8;
            match self.buffer.get_mut(self.position) {
                Some(slot) => {
                    *slot = byte;
                    self.position += 1;
                }
                None => error!(position = self.position, "PutBits: no space left to flush"),
            }
            self.bit_buf <<= 8;
            self.bit_left += 8;
        }
        self.bit_left = 32;
        self.bit_buf = 0;
    }

    /// Bytes written to the output so far
    pub fn bytes_written(&self) -> usize {
        self.position
    }

    /// Bits written, including those still in the shift register
    pub fn bit_count(&self) -> usize {
        self.position * 8 + (32 - self.bit_left) as usize
    }

    fn write_word(&mut self, word: u32) {
        if self.buffer.len() - self.position >= 4 {
            self.buffer[self.position..self.position + 4].copy_from_slice(&word.to_be_bytes());
            self.position += 4;
        } else {
            error!(
                position = self.position,
                capacity = self.buffer.len(),
                "PutBits: buffer too small, word dropped"
            );
        }
    }
}
