//! Packet header bit I/O (ISO/IEC 15444-1 B.10.1).
//!
//! Bits are packed MSB first. A byte following 0xFF carries only 7 bits so no
//! marker code can appear inside a header.

use crate::error::{J2kError, Result};

#[derive(Debug, Clone)]
pub struct J2kBitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit_buffer: u8,
    bits_left: u8,
    last_was_ff: bool,
}

impl<'a> J2kBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bit_buffer: 0,
            bits_left: 0,
            last_was_ff: false,
        }
    }

    pub fn read_bit(&mut self) -> Result<u8> {
        if self.bits_left == 0 {
            let b = *self.data.get(self.pos).ok_or(J2kError::NeedMoreData)?;
            self.pos += 1;
            self.bits_left = if self.last_was_ff { 7 } else { 8 };
            self.last_was_ff = b == 0xFF;
            self.bit_buffer = b;
        }
        self.bits_left -= 1;
        Ok((self.bit_buffer >> self.bits_left) & 1)
    }

    pub fn read_bits(&mut self, count: u8) -> Result<u32> {
        let mut bits = 0u32;
        for _ in 0..count {
            bits = (bits << 1) | u32::from(self.read_bit()?);
        }
        Ok(bits)
    }

    /// Skips to the end of the header and returns the bytes it occupied,
    /// including the stuffed byte after a final 0xFF.
    pub fn finish(mut self) -> Result<usize> {
        if self.last_was_ff {
            if self.pos >= self.data.len() {
                return Err(J2kError::NeedMoreData);
            }
            self.pos += 1;
        }
        Ok(self.pos)
    }
}

#[derive(Debug, Clone, Default)]
pub struct J2kBitWriter {
    data: Vec<u8>,
    bit_buffer: u8,
    bits_count: u8,
    capacity: u8,
}

impl J2kBitWriter {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            bit_buffer: 0,
            bits_count: 0,
            capacity: 8,
        }
    }

    pub fn write_bit(&mut self, bit: u8) {
        self.bit_buffer = (self.bit_buffer << 1) | (bit & 1);
        self.bits_count += 1;
        if self.bits_count == self.capacity {
            self.flush_byte();
        }
    }

    /// Writes the `count` low bits of `value`, MSB first.
    pub fn write_bits(&mut self, value: u32, count: u8) {
        for i in (0..count).rev() {
            self.write_bit(((value >> i) & 1) as u8);
        }
    }

    fn flush_byte(&mut self) {
        let b = self.bit_buffer;
        self.data.push(b);
        self.capacity = if b == 0xFF { 7 } else { 8 };
        self.bit_buffer = 0;
        self.bits_count = 0;
    }

    /// Bytes the header occupies once finished.
    pub fn len(&self) -> usize {
        let pending = self.bits_count > 0 || self.data.last() == Some(&0xFF);
        self.data.len() + usize::from(pending)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pads the last byte with zeros. A final 0xFF is followed by a stuffed
    /// zero byte.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bits_count > 0 {
            self.bit_buffer <<= self.capacity - self.bits_count;
            self.flush_byte();
        }
        if self.data.last() == Some(&0xFF) {
            self.data.push(0);
        }
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_roundtrip() {
        let mut w = J2kBitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0x3FF, 10);
        w.write_bits(42, 7);
        assert_eq!(w.len(), 3);
        let buf = w.finish();
        let mut r = J2kBitReader::new(&buf);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_bits(10).unwrap(), 0x3FF);
        assert_eq!(r.read_bits(7).unwrap(), 42);
    }

    #[test]
    fn test_stuffing_after_ff() {
        let mut w = J2kBitWriter::new();
        w.write_bits(0xFF, 8);
        w.write_bits(0x7F, 7);
        w.write_bit(1);
        let buf = w.finish();
        assert_eq!(buf, vec![0xFF, 0x7F, 0x80]);
        let mut r = J2kBitReader::new(&buf);
        assert_eq!(r.read_bits(8).unwrap(), 0xFF);
        assert_eq!(r.read_bits(7).unwrap(), 0x7F);
        assert_eq!(r.read_bit().unwrap(), 1);
        assert_eq!(r.finish().unwrap(), 3);
    }

    #[test]
    fn test_trailing_ff_gets_zero_byte() {
        let mut w = J2kBitWriter::new();
        w.write_bits(0xFF, 8);
        assert_eq!(w.len(), 2);
        let buf = w.finish();
        assert_eq!(buf, vec![0xFF, 0x00]);
        let mut r = J2kBitReader::new(&buf);
        r.read_bits(8).unwrap();
        assert_eq!(r.finish().unwrap(), 2);
    }

    #[test]
    fn test_truncated_header() {
        let mut r = J2kBitReader::new(&[0xA0]);
        assert!(r.read_bits(8).is_ok());
        assert_eq!(r.read_bit(), Err(J2kError::NeedMoreData));
    }
}
