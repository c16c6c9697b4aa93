//! Wire codec: fixed-width little-endian integers, LEB128-style varuint
//! and zig-zag varint, and length-prefixed bytes/strings, all over a
//! bounded memory region.
//!
//! Every write/read returns `bool`/`Option` instead of asserting: a write
//! that would overrun the buffer fails and leaves the cursor position
//! unchanged, same for a read that needs more bytes than remain.

use crate::constants::MAX_VARINT_BYTES;

/// A cursor over a fixed `&mut [u8]` region that fails closed rather than
/// panicking or growing the buffer.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        ByteWriter { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn put(&mut self, bytes: &[u8]) -> bool {
        if self.remaining() < bytes.len() {
            return false;
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        true
    }

    pub fn write_u8(&mut self, v: u8) -> bool {
        self.put(&[v])
    }

    pub fn write_i8(&mut self, v: i8) -> bool {
        self.write_u8(v as u8)
    }

    pub fn write_u16_le(&mut self, v: u16) -> bool {
        self.put(&v.to_le_bytes())
    }

    pub fn write_i16_le(&mut self, v: i16) -> bool {
        self.put(&v.to_le_bytes())
    }

    pub fn write_u32_le(&mut self, v: u32) -> bool {
        self.put(&v.to_le_bytes())
    }

    pub fn write_i32_le(&mut self, v: i32) -> bool {
        self.put(&v.to_le_bytes())
    }

    pub fn write_u64_le(&mut self, v: u64) -> bool {
        self.put(&v.to_le_bytes())
    }

    pub fn write_i64_le(&mut self, v: i64) -> bool {
        self.put(&v.to_le_bytes())
    }

    /// `usize` encodes on the wire as a fixed `u64`.
    pub fn write_usize(&mut self, v: usize) -> bool {
        self.write_u64_le(v as u64)
    }

    /// `isize` encodes on the wire as a fixed `i64`.
    pub fn write_isize(&mut self, v: isize) -> bool {
        self.write_i64_le(v as i64)
    }

    /// LEB128-style varuint: 7 bits per byte, high bit set while more
    /// bytes follow, at most [`MAX_VARINT_BYTES`] bytes.
    pub fn write_varuint(&mut self, mut v: u64) -> bool {
        let start = self.pos;
        let mut scratch = [0u8; MAX_VARINT_BYTES];
        let mut n = 0;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            scratch[n] = byte;
            n += 1;
            if v == 0 {
                break;
            }
        }
        if !self.put(&scratch[..n]) {
            self.pos = start;
            return false;
        }
        true
    }

    /// Zig-zag encoded varint.
    pub fn write_varint(&mut self, v: i64) -> bool {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        self.write_varuint(zigzag)
    }

    /// Raw bytes, no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> bool {
        self.put(bytes)
    }

    /// `varuint` length followed by the raw bytes.
    pub fn write_length_prefixed(&mut self, bytes: &[u8]) -> bool {
        let start = self.pos;
        if !self.write_varuint(bytes.len() as u64) || !self.put(bytes) {
            self.pos = start;
            return false;
        }
        true
    }

    pub fn write_string(&mut self, s: &str) -> bool {
        self.write_length_prefixed(s.as_bytes())
    }
}

/// A cursor over a `&[u8]` region; every read either fully succeeds and
/// advances the cursor, or fully fails and leaves it untouched.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_i8(&mut self) -> Option<i8> {
        self.read_u8().map(|b| b as i8)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16_le(&mut self) -> Option<i16> {
        self.take(2).map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_i32_le(&mut self) -> Option<i32> {
        self.take(4).map(|b| i32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.take(8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_i64_le(&mut self) -> Option<i64> {
        self.take(8).map(|b| i64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_usize(&mut self) -> Option<usize> {
        self.read_u64_le().map(|v| v as usize)
    }

    pub fn read_isize(&mut self) -> Option<isize> {
        self.read_i64_le().map(|v| v as isize)
    }

    pub fn read_varuint(&mut self) -> Option<u64> {
        let start = self.pos;
        let mut result: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = match self.read_u8() {
                Some(b) => b,
                None => {
                    self.pos = start;
                    return None;
                }
            };
            result |= ((byte & 0x7f) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Some(result);
            }
        }
        self.pos = start;
        None
    }

    pub fn read_varint(&mut self) -> Option<i64> {
        let zigzag = self.read_varuint()?;
        Some(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    pub fn read_raw(&mut self, n: usize) -> Option<&'a [u8]> {
        self.take(n)
    }

    pub fn read_length_prefixed(&mut self) -> Option<&'a [u8]> {
        let start = self.pos;
        let len = self.read_varuint()?;
        match self.take(len as usize) {
            Some(slice) => Some(slice),
            None => {
                self.pos = start;
                None
            }
        }
    }

    pub fn read_string(&mut self) -> Option<String> {
        let start = self.pos;
        let bytes = self.read_length_prefixed()?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Some(s.to_owned()),
            Err(_) => {
                self.pos = start;
                None
            }
        }
    }
}
