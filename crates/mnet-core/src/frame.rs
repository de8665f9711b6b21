//! Decoded application frames.
//!
//! Wire layout after decryption: `[2-byte little-endian opcode][payload]`.
//! A frame owns a rented buffer that goes back to its pool when the frame
//! is dropped, so handlers only ever borrow it for one dispatch.

use crate::error::{NetError, NetResult};
use crate::packet::ByteReader;
use crate::pool::PooledBuffer;

/// Size of the opcode prefix.
pub const OPCODE_SIZE: usize = 2;

#[derive(Debug)]
pub struct Frame {
    buf: PooledBuffer,
}

impl Frame {
    /// Wrap decrypted bytes. Fails if there is no room for the opcode.
    pub fn new(buf: PooledBuffer) -> NetResult<Self> {
        if buf.len() < OPCODE_SIZE {
            return Err(NetError::MalformedFrame(format!(
                "frame of {} bytes has no opcode",
                buf.len()
            )));
        }
        Ok(Self { buf })
    }

    pub fn opcode(&self) -> u16 {
        u16::from_le_bytes([self.buf[0], self.buf[1]])
    }

    /// Payload after the opcode.
    pub fn payload(&self) -> &[u8] {
        &self.buf[OPCODE_SIZE..]
    }

    /// Reader positioned at the first payload byte.
    pub fn reader(&self) -> ByteReader<'_> {
        ByteReader::new(self.payload())
    }

    /// Full frame bytes, opcode included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;

    #[test]
    fn opcode_and_payload() {
        let frame = Frame::new(PooledBuffer::unpooled(vec![0x42, 0x00, 0x01, 0x02])).unwrap();
        assert_eq!(frame.opcode(), 0x0042);
        assert_eq!(frame.payload(), &[0x01, 0x02]);
        let mut reader = frame.reader();
        assert_eq!(reader.read_u8().unwrap(), 0x01);
    }

    #[test]
    fn short_frame_rejected() {
        let err = Frame::new(PooledBuffer::unpooled(vec![0x42])).unwrap_err();
        assert!(matches!(err, NetError::MalformedFrame(_)));
    }

    #[test]
    fn dropping_frame_returns_buffer() {
        let pool = BufferPool::new();
        let mut buf = pool.rent(2);
        buf.copy_from_slice(&[0x01, 0x00]);
        let frame = Frame::new(buf).unwrap();
        assert_eq!(pool.idle(), 0);
        drop(frame);
        assert_eq!(pool.idle(), 1);
    }
}
