//! Table-driven CRC engine
//!
//! Tables are built once for a (width, polynomial, endianness) triple and are
//! read-only afterwards. A 1024-entry table carries three extra 256-entry
//! slices so aligned input is folded four bytes at a time.
//!
//! The running value is returned as-is: seeding and any final XOR are up to
//! the caller. For big-endian variants the result is held byte-swapped in the
//! low `bits` of the `u32` (e.g. CRC-16/ANSI of `"123456789"` is `0xE8FE`,
//! i.e. `0xFEE8` in conventional notation).
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


use crate::error::{TransportError, TransportResult};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Entries in a byte-at-a-time table (plus the slicing marker)
const BASIC_TABLE_SIZE: usize = 257;
/// Entries in a slice-by-4 table
const SLICED_TABLE_SIZE: usize = 1024;

/// Predefined CRC variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrcVariant {
    /// CRC-8/ATM, x^8 + x^2 + x + 1
    Crc8Atm,
    /// CRC-16/ANSI, 0x8005
    Crc16Ansi,
    /// CRC-16/CCITT, 0x1021
    Crc16Ccitt,
    /// CRC-32/IEEE, 0x04C11DB7 (MPEG-TS section CRC)
    Crc32Ieee,
    /// CRC-32/IEEE reflected, 0xEDB88320 (zlib, PNG)
    Crc32IeeeLe,
    /// CRC-16/ANSI reflected, 0xA001
    Crc16AnsiLe,
    /// CRC-24/IEEE, 0x864CFB
    Crc24Ieee,
}

impl CrcVariant {
    pub const ALL: [CrcVariant; 7] = [
        CrcVariant::Crc8Atm,
        CrcVariant::Crc16Ansi,
        CrcVariant::Crc16Ccitt,
        CrcVariant::Crc32Ieee,
        CrcVariant::Crc32IeeeLe,
        CrcVariant::Crc16AnsiLe,
        CrcVariant::Crc24Ieee,
    ];

    /// `(little_endian, bits, polynomial)`
    pub fn parameters(self) -> (bool, u32, u32) {
        match self {
            CrcVariant::Crc8Atm => (false, 8, 0x07),
            CrcVariant::Crc16Ansi => (false, 16, 0x8005),
            CrcVariant::Crc16Ccitt => (false, 16, 0x1021),
            CrcVariant::Crc32Ieee => (false, 32, 0x04C1_1DB7),
            CrcVariant::Crc32IeeeLe => (true, 32, 0xEDB8_8320),
            CrcVariant::Crc16AnsiLe => (true, 16, 0xA001),
            CrcVariant::Crc24Ieee => (false, 24, 0x0086_4CFB),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Read-only CRC lookup table
#[derive(Debug, Clone)]
pub struct CrcTable {
    entries: Vec<u32>,
}

impl CrcTable {
    /// Build a table, optionally with the slice-by-4 extension
    pub fn new(little_endian: bool, bits: u32, polynomial: u32, sliced: bool) -> TransportResult<Self> {
        if !(8..=32).contains(&bits) || u64::from(polynomial) >= (1u64 << bits) {
            return Err(TransportError::InvalidCrcParameters { bits, polynomial });
        }
        Ok(CrcTable {
            entries: build_entries(little_endian, bits, polynomial, sliced),
        })
    }

    /// Whether the slice-by-4 extension is present
    pub fn is_sliced(&self) -> bool {
        self.entries[256] == 0
    }

    /// Fold `buffer` into the running value `crc`
    pub fn calculate(&self, mut crc: u32, buffer: &[u8]) -> u32 {
        let t = &self.entries;
        let mut rest = buffer;

        if self.is_sliced() {
            let lead = buffer.as_ptr().align_offset(4).min(buffer.len());
            let (head, aligned) = buffer.split_at(lead);
            for &byte in head {
                crc = t[((crc as u8) ^ byte) as usize] ^ (crc >> 8);
            }

            let mut words = aligned.chunks_exact(4);
            for word in &mut words {
                crc ^= u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                crc = t[3 * 256 + (crc & 0xFF) as usize]
                    ^ t[2 * 256 + ((crc >> 8) & 0xFF) as usize]
                    ^ t[256 + ((crc >> 16) & 0xFF) as usize]
                    ^ t[(crc >> 24) as usize];
            }
            rest = words.remainder();
        }

        for &byte in rest {
            crc = t[((crc as u8) ^ byte) as usize] ^ (crc >> 8);
        }
        crc
    }
}

fn build_entries(little_endian: bool, bits: u32, polynomial: u32, sliced: bool) -> Vec<u32> {
    let size = if sliced { SLICED_TABLE_SIZE } else { BASIC_TABLE_SIZE };
    let mut t = vec![0u32; size];

    for (i, entry) in t.iter_mut().take(256).enumerate() {
        let i = i as u32;
        *entry = if little_endian {
            let mut c = i;
            for _ in 0..8 {
                c = (c >> 1) ^ (polynomial & (c & 1).wrapping_neg());
            }
            c
        } else {
            let shifted_poly = polynomial << (32 - bits);
            let mut c = i << 24;
            for _ in 0..8 {
                c = (c << 1) ^ (shifted_poly & (((c as i32) >> 31) as u32));
            }
            c.swap_bytes()
        };
    }

    // Marker, cleared below when slicing is available
    t[256] = 1;

    if sliced {
        for i in 0..256 {
            for j in 0..3 {
                let prev = t[256 * j + i];
                t[256 * (j + 1) + i] = (prev >> 8) ^ t[(prev & 0xFF) as usize];
            }
        }
    }
    t
}

/// A single configurable CRC, initialised at runtime
#[derive(Debug, Default)]
pub struct CrcEngine {
    table: Option<CrcTable>,
}

impl CrcEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the lookup table for `bits`/`polynomial`.
    ///
    /// Returns `false` for a width outside 8..=32 or a polynomial that does
    /// not fit in `bits`. A failed init leaves the engine uninitialised.
    pub fn init(&mut self, bits: u32, polynomial: u32, little_endian: bool) -> bool {
        match CrcTable::new(little_endian, bits, polynomial, true) {
            Ok(table) => {
                self.table = Some(table);
                true
            }
            Err(e) => {
                warn!(error = %e, "CRC init rejected");
                self.table = None;
                false
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.table.is_some()
    }

    /// Fold `buffer` into `seed`; an uninitialised engine returns `seed`
    pub fn calculate(&self, seed: u32, buffer: &[u8]) -> u32 {
        match &self.table {
            Some(table) => table.calculate(seed, buffer),
            None => {
                warn!("CRC calculate on uninitialised engine");
                seed
            }
        }
    }
}

static PREDEFINED: OnceLock<Vec<CrcTable>> = OnceLock::new();

/// Shared table for a predefined variant, built on first use
pub fn table(variant: CrcVariant) -> &'static CrcTable {
    let tables = PREDEFINED.get_or_init(|| {
        debug!("Building predefined CRC tables");
        CrcVariant::ALL
            .iter()
            .map(|v| {
                let (le, bits, poly) = v.parameters();
                CrcTable {
                    entries: build_entries(le, bits, poly, true),
                }
            })
            .collect()
    });
    &tables[variant.index()]
}

/// Fold `buffer` into `seed` with a predefined variant
pub fn calculate(variant: CrcVariant, seed: u32, buffer: &[u8]) -> u32 {
    table(variant).calculate(seed, buffer)
}
