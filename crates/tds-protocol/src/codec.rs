//! Low-level decoding helpers shared by the token decoders.
//!
//! All multi-byte integers in TDS are little-endian and all character data
//! in token headers is UTF-16LE.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Fail with [`ProtocolError::UnexpectedEof`] unless `n` bytes remain.
#[inline]
pub fn ensure(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::UnexpectedEof);
    }
    Ok(())
}

/// Read a B_VARCHAR: 1-byte character count followed by UTF-16LE data.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    ensure(src, 1)?;
    let len = src.get_u8() as usize;
    read_utf16_string(src, len)
}

/// Read a US_VARCHAR: 2-byte character count followed by UTF-16LE data.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    ensure(src, 2)?;
    let len = src.get_u16_le() as usize;
    read_utf16_string(src, len)
}

/// Read `char_count` UTF-16LE code units.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Result<String, ProtocolError> {
    ensure(src, char_count * 2)?;
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Decode a complete UTF-16LE byte slice, as found in NVARCHAR values.
pub fn utf16le_to_string(bytes: &[u8]) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding(format!(
            "odd UTF-16 byte length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}

/// Write a B_VARCHAR (1-byte character count, truncated at 255).
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u8::MAX as usize).collect();
    dst.put_u8(units.len() as u8);
    units.iter().for_each(|&u| dst.put_u16_le(u));
}

/// Write a US_VARCHAR (2-byte character count, truncated at 65535).
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u16::MAX as usize).collect();
    dst.put_u16_le(units.len() as u16);
    units.iter().for_each(|&u| dst.put_u16_le(u));
}

/// Write UTF-16LE data without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    s.encode_utf16().for_each(|u| dst.put_u16_le(u));
}

/// Byte length of a string once encoded as UTF-16LE.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}
