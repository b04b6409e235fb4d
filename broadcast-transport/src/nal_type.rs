//! NAL unit classification for length-prefixed H.264 and HEVC access units
//!
//! Input is a NAL unit preceded by its 4-byte big-endian length (AVCC/HVCC
//! layout, as produced by hardware encoders).
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


use crate::bitstream::GetBits;

const LENGTH_PREFIX_BITS: usize = 32;

/// Parameter-set kind of a NAL unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalType {
    /// Anything that is not a parameter set
    Unknown,
    /// Video parameter set (HEVC only)
    Vps,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
}

/// Classified NAL unit header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub nal_type: NalType,
    /// Raw `nal_unit_type` field
    pub unit_type: u8,
    /// Video coding layer (slice data) unit
    pub is_vcl: bool,
}

impl NalHeader {
    pub fn is_parameter_set(&self) -> bool {
        self.nal_type != NalType::Unknown
    }
}

/// Classify an H.264 NAL unit; `None` if `data` is shorter than the header
pub fn nal_type_h264(data: &[u8]) -> Option<NalHeader> {
    if data.len() <= LENGTH_PREFIX_BITS / 8 {
        return None;
    }
    let mut bits = GetBits::new(data);
    bits.skip_bits(LENGTH_PREFIX_BITS);
    // forbidden_zero_bit, nal_ref_idc
    bits.skip_bits(3);
    let unit_type = bits.get_bits(5) as u8;

    let nal_type = match unit_type {
        7 => NalType::Sps,
        8 => NalType::Pps,
        _ => NalType::Unknown,
    };
    Some(NalHeader {
        nal_type,
        unit_type,
        is_vcl: unit_type <= 5,
    })
}

/// Classify an HEVC NAL unit; `None` if `data` is shorter than the header
pub fn nal_type_hevc(data: &[u8]) -> Option<NalHeader> {
    if data.len() <= LENGTH_PREFIX_BITS / 8 {
        return None;
    }
    let mut bits = GetBits::new(data);
    bits.skip_bits(LENGTH_PREFIX_BITS);
    // forbidden_zero_bit
    bits.skip_bits(1);
    let unit_type = bits.get_bits(6) as u8;

    let nal_type = match unit_type {
        32 => NalType::Vps,
        33 => NalType::Sps,
        34 => NalType::Pps,
        _ => NalType::Unknown,
    };
    Some(NalHeader {
        nal_type,
        unit_type,
        is_vcl: unit_type <= 31,
    })
}
