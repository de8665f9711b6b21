//! Reference cipher: a framed xorshift keystream.
//!
//! Wire format per packet: `[4-byte LE version][4-byte LE body length][body]`,
//! where the body is the plaintext XOR-ed with a keystream seeded from the
//! direction's IV and the block IV. The keystream runs continuously across
//! packets, so both peers must see the same packets in the same order.
//!
//! This cipher offers obfuscation only. It satisfies the [`CipherSuite`]
//! contract so the transport can be run and tested end to end; production
//! deployments plug their own suite in behind the same traits.

use crate::cipher::{CipherParams, CipherSuite, Decrypted, FrameDecryptor, FrameEncryptor};
use crate::error::{NetError, NetResult};
use crate::frame::Frame;
use crate::pool::BufferPool;

/// Size of the plaintext header preceding every body.
pub const HEADER_SIZE: usize = 8;

/// Default upper bound on a single body (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// Cipher suite producing [`XorEncryptor`] / [`XorDecryptor`] pairs.
#[derive(Debug, Clone)]
pub struct XorStreamCipher {
    max_frame_size: usize,
}

impl XorStreamCipher {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for XorStreamCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl CipherSuite for XorStreamCipher {
    fn encryptor(&self, params: CipherParams) -> Box<dyn FrameEncryptor> {
        Box::new(XorEncryptor {
            version: params.version,
            keystream: Keystream::new(params),
            max_frame_size: self.max_frame_size,
        })
    }

    fn decryptor(&self, params: CipherParams, pool: BufferPool) -> Box<dyn FrameDecryptor> {
        Box::new(XorDecryptor {
            version: params.version,
            keystream: Keystream::new(params),
            max_frame_size: self.max_frame_size,
            pool,
        })
    }
}

/// xorshift32 keystream.
#[derive(Debug, Clone)]
struct Keystream {
    state: u32,
}

impl Keystream {
    fn new(params: CipherParams) -> Self {
        let seed = params.iv ^ params.block_iv.rotate_left(16) ^ 0x9E37_79B9;
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_byte(&mut self) -> u8 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        (x >> 24) as u8
    }

    fn apply(&mut self, dst: &mut [u8], src: &[u8]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s ^ self.next_byte();
        }
    }
}

pub struct XorEncryptor {
    version: u32,
    keystream: Keystream,
    max_frame_size: usize,
}

impl FrameEncryptor for XorEncryptor {
    fn encrypt(&mut self, plaintext: &[u8]) -> NetResult<Vec<u8>> {
        if plaintext.len() > self.max_frame_size {
            return Err(NetError::Cipher(format!(
                "packet of {} bytes exceeds limit {}",
                plaintext.len(),
                self.max_frame_size
            )));
        }
        let mut out = vec![0u8; HEADER_SIZE + plaintext.len()];
        out[..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..HEADER_SIZE].copy_from_slice(&(plaintext.len() as u32).to_le_bytes());
        self.keystream.apply(&mut out[HEADER_SIZE..], plaintext);
        Ok(out)
    }
}

pub struct XorDecryptor {
    version: u32,
    keystream: Keystream,
    max_frame_size: usize,
    pool: BufferPool,
}

impl FrameDecryptor for XorDecryptor {
    fn decrypt(&mut self, buffered: &[u8]) -> NetResult<Decrypted> {
        if buffered.len() < HEADER_SIZE {
            return Ok(Decrypted::incomplete());
        }

        let version = u32::from_le_bytes([buffered[0], buffered[1], buffered[2], buffered[3]]);
        if version != self.version {
            return Err(NetError::Cipher(format!(
                "header version {version} does not match {}",
                self.version
            )));
        }

        let len = u32::from_le_bytes([buffered[4], buffered[5], buffered[6], buffered[7]]) as usize;
        if len > self.max_frame_size {
            return Err(NetError::Cipher(format!(
                "frame of {len} bytes exceeds limit {}",
                self.max_frame_size
            )));
        }

        let total = HEADER_SIZE + len;
        if buffered.len() < total {
            return Ok(Decrypted::incomplete());
        }

        // Empty bodies carry no packet but still occupy the wire.
        if len == 0 {
            return Ok(Decrypted {
                consumed: HEADER_SIZE,
                frame: None,
            });
        }

        let mut buf = self.pool.rent(len);
        self.keystream.apply(&mut buf, &buffered[HEADER_SIZE..total]);
        Ok(Decrypted {
            consumed: total,
            frame: Some(Frame::new(buf)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(iv: u32) -> CipherParams {
        CipherParams {
            version: 12,
            iv,
            block_iv: 12,
        }
    }

    fn pair(iv: u32) -> (Box<dyn FrameEncryptor>, Box<dyn FrameDecryptor>) {
        let suite = XorStreamCipher::new();
        (
            suite.encryptor(params(iv)),
            suite.decryptor(params(iv), BufferPool::new()),
        )
    }

    #[test]
    fn keystream_carries_across_packets() {
        let (mut enc, mut dec) = pair(0xCAFEBABE);
        let first = enc.encrypt(&[0x42, 0x00, 1, 2, 3]).unwrap();
        let second = enc.encrypt(&[0x42, 0x00, 1, 2, 3]).unwrap();
        // Same plaintext, different ciphertext body.
        assert_ne!(first[HEADER_SIZE..], second[HEADER_SIZE..]);

        for wire in [first, second] {
            let out = dec.decrypt(&wire).unwrap();
            assert_eq!(out.consumed, wire.len());
            assert_eq!(out.frame.unwrap().as_bytes(), &[0x42, 0x00, 1, 2, 3]);
        }
    }

    #[test]
    fn partial_input_waits() {
        let (mut enc, mut dec) = pair(7);
        let wire = enc.encrypt(&[0x10, 0x00, 0xAA]).unwrap();
        for cut in 0..wire.len() {
            let out = dec.decrypt(&wire[..cut]).unwrap();
            assert_eq!(out.consumed, 0);
            assert!(out.frame.is_none());
        }
    }

    #[test]
    fn empty_body_is_consumed_without_frame() {
        let (mut enc, mut dec) = pair(9);
        let mut wire = enc.encrypt(&[]).unwrap();
        wire.extend(enc.encrypt(&[0x01, 0x00]).unwrap());

        let out = dec.decrypt(&wire).unwrap();
        assert_eq!(out.consumed, HEADER_SIZE);
        assert!(out.frame.is_none());

        let out = dec.decrypt(&wire[HEADER_SIZE..]).unwrap();
        assert_eq!(out.frame.unwrap().opcode(), 0x0001);
    }

    #[test]
    fn version_mismatch_is_an_error() {
        let suite = XorStreamCipher::new();
        let mut enc = suite.encryptor(CipherParams {
            version: 13,
            iv: 1,
            block_iv: 12,
        });
        let mut dec = suite.decryptor(params(1), BufferPool::new());
        let wire = enc.encrypt(&[0x01, 0x00]).unwrap();
        assert!(matches!(dec.decrypt(&wire), Err(NetError::Cipher(_))));
    }

    #[test]
    fn versions_differing_above_16_bits_do_not_interoperate() {
        let suite = XorStreamCipher::new();
        let wide = CipherParams {
            version: 12 + 0x1_0000,
            iv: 1,
            block_iv: 12,
        };
        let wire = suite.encryptor(wide).encrypt(&[0x01, 0x00]).unwrap();
        assert_eq!(&wire[..4], &0x1_000Cu32.to_le_bytes());

        let mut narrow = suite.decryptor(params(1), BufferPool::new());
        assert!(matches!(narrow.decrypt(&wire), Err(NetError::Cipher(_))));
        let mut matching = suite.decryptor(wide, BufferPool::new());
        assert_eq!(matching.decrypt(&wire).unwrap().frame.unwrap().opcode(), 0x0001);
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let suite = XorStreamCipher::with_max_frame_size(4);
        let mut dec = suite.decryptor(params(1), BufferPool::new());
        let mut header = 12u32.to_le_bytes().to_vec();
        header.extend_from_slice(&5u32.to_le_bytes());
        assert!(matches!(dec.decrypt(&header), Err(NetError::Cipher(_))));

        let mut enc = suite.encryptor(params(1));
        assert!(enc.encrypt(&[0u8; 5]).is_err());
    }

    #[test]
    fn one_byte_body_is_malformed() {
        let (mut enc, mut dec) = pair(3);
        let wire = enc.encrypt(&[0x01]).unwrap();
        assert!(matches!(dec.decrypt(&wire), Err(NetError::MalformedFrame(_))));
    }
}
