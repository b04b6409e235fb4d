//! AMF0-style typed value encoding
//!
//! Writers append to any [`BufMut`] (`Vec<u8>`, `BytesMut`). Integer helpers
//! are big-endian. Typed values start with a one-byte [`AmfDataType`] marker;
//! the `put_named_*` variants prefix a 2-byte-length UTF-8 key, which is how
//! command objects and metadata are laid out on the wire.
//!
//! Decoders never read past the input: short input yields
//! [`TransportError::Truncated`].
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
use bytes::BufMut;

/// AMF0 type markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AmfDataType {
    Number = 0x00,
    Boolean = 0x01,
    String = 0x02,
    Object = 0x03,
    /// Reserved
    MovieClip = 0x04,
    Null = 0x05,
    Undefined = 0x06,
    Reference = 0x07,
    EcmaArray = 0x08,
    ObjectEnd = 0x09,
    StrictArray = 0x0A,
    Date = 0x0B,
    LongString = 0x0C,
    Unsupported = 0x0D,
    /// Reserved
    RecordSet = 0x0E,
    XmlDocument = 0x0F,
    TypedObject = 0x10,
    /// Switch to AMF3
    AvmPlus = 0x11,
    Invalid = 0xFF,
}

impl AmfDataType {
    pub fn from_u8(marker: u8) -> Self {
        match marker {
            0x00 => AmfDataType::Number,
            0x01 => AmfDataType::Boolean,
            0x02 => AmfDataType::String,
            0x03 => AmfDataType::Object,
            0x04 => AmfDataType::MovieClip,
            0x05 => AmfDataType::Null,
            0x06 => AmfDataType::Undefined,
            0x07 => AmfDataType::Reference,
            0x08 => AmfDataType::EcmaArray,
            0x09 => AmfDataType::ObjectEnd,
            0x0A => AmfDataType::StrictArray,
            0x0B => AmfDataType::Date,
            0x0C => AmfDataType::LongString,
            0x0D => AmfDataType::Unsupported,
            0x0E => AmfDataType::RecordSet,
            0x0F => AmfDataType::XmlDocument,
            0x10 => AmfDataType::TypedObject,
            0x11 => AmfDataType::AvmPlus,
            _ => AmfDataType::Invalid,
        }
    }
}

impl From<AmfDataType> for u8 {
    fn from(marker: AmfDataType) -> u8 {
        marker as u8
    }
}

pub fn put_byte(buf: &mut impl BufMut, value: u8) {
    buf.put_u8(value);
}

pub fn put_be16(buf: &mut impl BufMut, value: u16) {
    buf.put_u16(value);
}

/// Low 24 bits of `value`, big-endian
pub fn put_be24(buf: &mut impl BufMut, value: u32) {
    buf.put_uint(u64::from(value & 0x00FF_FFFF), 3);
}

pub fn put_be32(buf: &mut impl BufMut, value: u32) {
    buf.put_u32(value);
}

/// Raw tag bytes, up to the first NUL if any (e.g. `b"FLV"`)
pub fn put_tag(buf: &mut impl BufMut, tag: &[u8]) {
    let end = tag.iter().position(|&b| b == 0).unwrap_or(tag.len());
    buf.put_slice(&tag[..end]);
}

/// Number marker followed by the IEEE-754 double in network order
pub fn put_double(buf: &mut impl BufMut, value: f64) {
    buf.put_u8(AmfDataType::Number.into());
    buf.put_f64(value);
}

/// String marker with a 2-byte length, or the long-string marker with a
/// 4-byte length once the UTF-8 payload no longer fits in 16 bits
pub fn put_string(buf: &mut impl BufMut, value: &str) {
    let bytes = value.as_bytes();
    match u16::try_from(bytes.len()) {
        Ok(len) => {
            buf.put_u8(AmfDataType::String.into());
            buf.put_u16(len);
        }
        Err(_) => {
            buf.put_u8(AmfDataType::LongString.into());
            buf.put_u32(bytes.len() as u32);
        }
    }
    buf.put_slice(bytes);
}

pub fn put_bool(buf: &mut impl BufMut, value: bool) {
    buf.put_u8(AmfDataType::Boolean.into());
    buf.put_u8(u8::from(value));
}

/// Property key: 2-byte length and UTF-8 bytes, no marker
///
/// Keys longer than 65535 bytes are cut at that length.
pub fn put_name(buf: &mut impl BufMut, name: &str) {
    let bytes = name.as_bytes();
    let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
    buf.put_u16(len);
    buf.put_slice(&bytes[..usize::from(len)]);
}

pub fn put_named_double(buf: &mut impl BufMut, name: &str, value: f64) {
    put_name(buf, name);
    put_double(buf, value);
}

pub fn put_named_string(buf: &mut impl BufMut, name: &str, value: &str) {
    put_name(buf, name);
    put_string(buf, value);
}

pub fn put_named_bool(buf: &mut impl BufMut, name: &str, value: bool) {
    put_name(buf, name);
    put_bool(buf, value);
}

fn take<const N: usize>(buf: &[u8]) -> TransportResult<[u8; N]> {
    buf.get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(TransportError::Truncated {
            needed: N,
            available: buf.len(),
        })
}

fn expect_marker(buf: &[u8], expected: AmfDataType) -> TransportResult<()> {
    let [marker] = take::<1>(buf)?;
    if marker != u8::from(expected) {
        return Err(TransportError::InvalidMarker(marker));
    }
    Ok(())
}

pub fn get_be16(buf: &[u8]) -> TransportResult<u16> {
    Ok(u16::from_be_bytes(take::<2>(buf)?))
}

pub fn get_be24(buf: &[u8]) -> TransportResult<u32> {
    let [b0, b1, b2] = take::<3>(buf)?;
    Ok(u32::from_be_bytes([0, b0, b1, b2]))
}

pub fn get_be32(buf: &[u8]) -> TransportResult<u32> {
    Ok(u32::from_be_bytes(take::<4>(buf)?))
}

/// Decode a typed number; returns the value and the bytes consumed
pub fn get_double(buf: &[u8]) -> TransportResult<(f64, usize)> {
    expect_marker(buf, AmfDataType::Number)?;
    let value = f64::from_be_bytes(take::<8>(&buf[1..])?);
    Ok((value, 9))
}

/// Decode a typed boolean; returns the value and the bytes consumed
pub fn get_bool(buf: &[u8]) -> TransportResult<(bool, usize)> {
    expect_marker(buf, AmfDataType::Boolean)?;
    let [value] = take::<1>(&buf[1..])?;
    Ok((value != 0, 2))
}

/// Decode a typed string in short or long form; returns the string and the
/// bytes consumed, marker included
pub fn get_string(buf: &[u8]) -> TransportResult<(String, usize)> {
    let [marker] = take::<1>(buf)?;
    let (len, header) = match AmfDataType::from_u8(marker) {
        AmfDataType::String => (usize::from(get_be16(&buf[1..])?), 3),
        AmfDataType::LongString => (get_be32(&buf[1..])? as usize, 5),
        _ => return Err(TransportError::InvalidMarker(marker)),
    };

    let payload = buf.get(header..header + len).ok_or(TransportError::Truncated {
        needed: header + len,
        available: buf.len(),
    })?;
    let value = String::from_utf8(payload.to_vec())?;
    Ok((value, header + len))
}
