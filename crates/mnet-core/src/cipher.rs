//! Stream cipher contract.
//!
//! The transport never looks inside the cipher. It needs two operations:
//!
//! * `encrypt(plaintext)` producing a self-delimiting wire frame, and
//! * `decrypt(buffered)` returning how many bytes were consumed and,
//!   possibly, one plaintext frame. `consumed == 0` means "not enough bytes
//!   buffered yet"; any non-zero `consumed` must be sliced off by the caller
//!   whether or not a frame came back.
//!
//! Each direction of a connection gets its own instance, keyed by the
//! protocol version, a per-connection IV and the fixed block IV.

use crate::error::NetResult;
use crate::frame::Frame;
use crate::pool::BufferPool;
use rand::rngs::OsRng;
use rand::RngCore;

/// Keying material for one direction of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherParams {
    pub version: u32,
    pub iv: u32,
    pub block_iv: u32,
}

/// Result of one decrypt attempt.
#[derive(Debug)]
pub struct Decrypted {
    /// Bytes to slice off the front of the buffer. Zero means "wait for more".
    pub consumed: usize,
    pub frame: Option<Frame>,
}

impl Decrypted {
    /// Not enough bytes buffered for a complete wire frame.
    pub fn incomplete() -> Self {
        Self {
            consumed: 0,
            frame: None,
        }
    }
}

/// Outbound half of a connection's cipher.
pub trait FrameEncryptor: Send {
    /// Encrypt one plaintext packet into a framed ciphertext.
    fn encrypt(&mut self, plaintext: &[u8]) -> NetResult<Vec<u8>>;
}

/// Inbound half of a connection's cipher.
pub trait FrameDecryptor: Send {
    /// Try to decrypt one frame from the front of `buffered`.
    fn decrypt(&mut self, buffered: &[u8]) -> NetResult<Decrypted>;
}

/// Factory for cipher instances, shared by every session of a listener.
pub trait CipherSuite: Send + Sync + 'static {
    fn encryptor(&self, params: CipherParams) -> Box<dyn FrameEncryptor>;

    /// Decrypted frames are written into buffers rented from `pool`.
    fn decryptor(&self, params: CipherParams, pool: BufferPool) -> Box<dyn FrameDecryptor>;
}

/// The per-connection IVs, drawn from the operating system's CSPRNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IvPair {
    pub send: u32,
    pub recv: u32,
}

impl IvPair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            send: rng.next_u32(),
            recv: rng.next_u32(),
        }
    }
}
