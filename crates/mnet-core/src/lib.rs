//! mnet-core: Shared protocol library for the mnet game transport.
//!
//! Provides the handshake record, the stream-cipher contract (plus a
//! reference cipher), decoded frames backed by pooled buffers, and the
//! little-endian byte reader/writer used by packet handlers.

pub mod cipher;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod keystream;
pub mod opcode;
pub mod packet;
pub mod pool;

// Re-export commonly used items at crate root.
pub use cipher::{CipherParams, CipherSuite, Decrypted, FrameDecryptor, FrameEncryptor, IvPair};
pub use error::{NetError, NetResult};
pub use frame::Frame;
pub use handshake::{Handshake, PatchType, HANDSHAKE_SIZE};
pub use keystream::XorStreamCipher;
pub use packet::{ByteReader, ByteWriter};
pub use pool::{BufferPool, PooledBuffer};
