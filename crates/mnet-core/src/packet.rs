//! Little-endian packet reader and writer.
//!
//! Packets are `opcode:u16 | payload`. Handlers receive a [`ByteReader`]
//! positioned just after the opcode; outgoing packets are built with a
//! [`ByteWriter`] that starts with the opcode.

use crate::error::{NetError, NetResult};

/// Cursor over a borrowed packet payload.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the underlying buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The unread tail of the buffer, without advancing.
    pub fn peek_rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn skip(&mut self, n: usize) -> NetResult<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> NetResult<&'a [u8]> {
        self.take(n)
    }

    pub fn read_u8(&mut self) -> NetResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> NetResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> NetResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> NetResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> NetResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn read_u64(&mut self) -> NetResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn read_i64(&mut self) -> NetResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Read a `u16` length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> NetResult<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| NetError::MalformedFrame(format!("invalid utf-8 string: {e}")))
    }

    fn array<const N: usize>(&mut self) -> NetResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take(&mut self, n: usize) -> NetResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(NetError::Underflow {
                wanted: n,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }
}

/// Growable packet builder.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Start a packet with the given opcode.
    pub fn of(opcode: u16) -> Self {
        let mut writer = Self::with_capacity(64);
        writer.write_u16(opcode);
        writer
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Write a `u16` length-prefixed UTF-8 string. Longer strings are truncated
    /// at the last character boundary that fits.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        let mut end = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.write_u16(end as u16);
        self.write_bytes(&value.as_bytes()[..end])
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl AsRef<[u8]> for ByteWriter {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read() {
        let mut w = ByteWriter::of(0x0042);
        w.write_u8(7)
            .write_bool(true)
            .write_u32(0xDEADBEEF)
            .write_i64(-5)
            .write_string("hello");

        let bytes = w.into_inner();
        assert_eq!(&bytes[..2], &[0x42, 0x00]);

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u16().unwrap(), 0x0042);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(r.read_i64().unwrap(), -5);
        assert_eq!(r.read_string().unwrap(), "hello");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn underflow_is_an_error() {
        let mut r = ByteReader::new(&[0x01, 0x02, 0x03]);
        assert!(matches!(
            r.read_u32(),
            Err(NetError::Underflow {
                wanted: 4,
                remaining: 3
            })
        ));
        // A failed read does not move the cursor.
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn string_truncates_on_char_boundary() {
        let long = "é".repeat(40_000); // 80_000 bytes
        let mut w = ByteWriter::new();
        w.write_string(&long);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        let s = r.read_string().unwrap();
        assert!(s.len() <= u16::MAX as usize);
        assert!(s.chars().all(|c| c == 'é'));
    }
}
