//! Minimal protobuf wire-format primitives.
//!
//! The header message uses only two wire types: varint (0) and
//! length-delimited (2). Fixed32/fixed64 are still handled on the read
//! side so unknown fields of any type can be skipped and preserved.

use crate::error::{Result, TonieError};

/// Varint-encoded integer.
pub const WIRE_VARINT: u8 = 0;
/// 8-byte little-endian value.
pub const WIRE_FIXED64: u8 = 1;
/// Length-delimited byte sequence.
pub const WIRE_LEN: u8 = 2;
/// 4-byte little-endian value.
pub const WIRE_FIXED32: u8 = 5;

/// Longest legal varint encoding of a u64.
const MAX_VARINT_BYTES: usize = 10;

/// Cursor over a protobuf message body.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset within the message.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// True when every byte of the message has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn malformed(&self, reason: impl Into<String>) -> TonieError {
        TonieError::MalformedMessage {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    /// Read one base-128 varint.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| self.malformed("varint runs past end of message"))?;
            self.pos += 1;
            // The tenth byte may only contribute the final bit.
            if i == MAX_VARINT_BYTES - 1 && byte > 1 {
                return Err(self.malformed("varint exceeds 64 bits"));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(self.malformed("varint longer than 10 bytes"))
    }

    /// Read a field tag, returning `(field_number, wire_type)`.
    pub fn read_tag(&mut self) -> Result<(u32, u8)> {
        let key = self.read_varint()?;
        let field = (key >> 3) as u32;
        let wire_type = (key & 0x7) as u8;
        if field == 0 {
            return Err(self.malformed("field number 0 is reserved"));
        }
        Ok((field, wire_type))
    }

    /// Read a length-delimited value (wire type 2).
    pub fn read_len_delimited(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| self.malformed(format!("length-delimited field of {len} bytes overruns message")))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Skip a value of the given wire type without interpreting it.
    pub fn skip_value(&mut self, wire_type: u8) -> Result<()> {
        match wire_type {
            WIRE_VARINT => {
                self.read_varint()?;
            }
            WIRE_FIXED64 => self.advance(8)?,
            WIRE_LEN => {
                self.read_len_delimited()?;
            }
            WIRE_FIXED32 => self.advance(4)?,
            other => return Err(self.malformed(format!("unsupported wire type {other}"))),
        }
        Ok(())
    }

    /// The raw bytes of the message between two cursor positions.
    /// Used to capture unknown fields (tag included) verbatim.
    pub fn raw_span(&self, start: usize, end: usize) -> &'a [u8] {
        &self.buf[start..end]
    }

    fn advance(&mut self, n: usize) -> Result<()> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| self.malformed(format!("fixed-width value of {n} bytes overruns message")))?;
        self.pos = end;
        Ok(())
    }
}

/// Append a base-128 varint to `out`.
pub fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append a field tag.
pub fn put_tag(out: &mut Vec<u8>, field: u32, wire_type: u8) {
    put_varint(out, (u64::from(field) << 3) | u64::from(wire_type));
}

/// Append a length-delimited field (tag + length + bytes).
pub fn put_len_delimited(out: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    put_tag(out, field, WIRE_LEN);
    put_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Number of bytes `value` occupies as a varint.
pub fn varint_len(value: u64) -> usize {
    // 1 byte per 7 significant bits, at least one.
    (((64 - value.max(1).leading_zeros()) as usize) + 6) / 7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 0xFFC, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), varint_len(value), "length of {value}");
            let mut reader = WireReader::new(&buf);
            assert_eq!(reader.read_varint().unwrap(), value);
            assert!(reader.is_at_end());
        }
    }

    #[test]
    fn test_varint_truncated() {
        // Continuation bit set but no following byte.
        let mut reader = WireReader::new(&[0x80]);
        assert!(reader.read_varint().is_err());
    }

    #[test]
    fn test_varint_too_long() {
        let buf = [0xFF; 11];
        let mut reader = WireReader::new(&buf);
        assert!(reader.read_varint().is_err());
    }

    #[test]
    fn test_tag_encoding() {
        let mut buf = Vec::new();
        put_tag(&mut buf, 4, WIRE_LEN);
        assert_eq!(buf, [0x22]);
        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_tag().unwrap(), (4, WIRE_LEN));
    }

    #[test]
    fn test_len_delimited_overrun() {
        // Claims 5 bytes, only 2 present.
        let buf = [0x05, 0xAA, 0xBB];
        let mut reader = WireReader::new(&buf);
        assert!(reader.read_len_delimited().is_err());
    }

    #[test]
    fn test_skip_fixed_widths() {
        let buf = [0u8; 12];
        let mut reader = WireReader::new(&buf);
        reader.skip_value(WIRE_FIXED64).unwrap();
        reader.skip_value(WIRE_FIXED32).unwrap();
        assert_eq!(reader.pos(), 12);
        assert!(reader.skip_value(WIRE_FIXED32).is_err());
    }
}
