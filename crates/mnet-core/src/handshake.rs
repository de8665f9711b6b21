//! The unencrypted handshake record.
//!
//! Sent once by the server immediately after accept, before any encrypted
//! traffic. Wire format (19 bytes, little-endian):
//!
//! `opcode:u16 | version:u32 | recv_iv:u32 | send_iv:u32 | block_iv:u32 | patch_type:u8`
//!
//! The IVs are named from the server's point of view: the client keys its
//! encryptor with `recv_iv` and its decryptor with `send_iv`.

use crate::error::{NetError, NetResult};
use crate::opcode;
use crate::packet::{ByteReader, ByteWriter};
use std::fmt;
use std::str::FromStr;

/// Encoded size of the handshake record.
pub const HANDSHAKE_SIZE: usize = 19;

/// How the client should treat its local patch data for this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PatchType {
    Delete = 0,
    Patch = 1,
    Ignore = 2,
}

impl TryFrom<u8> for PatchType {
    type Error = NetError;

    fn try_from(value: u8) -> NetResult<Self> {
        match value {
            0 => Ok(PatchType::Delete),
            1 => Ok(PatchType::Patch),
            2 => Ok(PatchType::Ignore),
            other => Err(NetError::InvalidHandshake(format!(
                "unknown patch type {other}"
            ))),
        }
    }
}

impl FromStr for PatchType {
    type Err = NetError;

    fn from_str(s: &str) -> NetResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "delete" => Ok(PatchType::Delete),
            "patch" => Ok(PatchType::Patch),
            "ignore" => Ok(PatchType::Ignore),
            other => Err(NetError::Config(format!("unknown patch type: {other}"))),
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchType::Delete => "delete",
            PatchType::Patch => "patch",
            PatchType::Ignore => "ignore",
        };
        f.write_str(name)
    }
}

/// The handshake record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub opcode: u16,
    pub version: u32,
    pub recv_iv: u32,
    pub send_iv: u32,
    pub block_iv: u32,
    pub patch_type: PatchType,
}

impl Handshake {
    /// Build the server's handshake with the standard opcode.
    pub fn new(version: u32, recv_iv: u32, send_iv: u32, block_iv: u32, patch_type: PatchType) -> Self {
        Self {
            opcode: opcode::REQUEST_VERSION,
            version,
            recv_iv,
            send_iv,
            block_iv,
            patch_type,
        }
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_SIZE] {
        let mut w = ByteWriter::with_capacity(HANDSHAKE_SIZE);
        w.write_u16(self.opcode)
            .write_u32(self.version)
            .write_u32(self.recv_iv)
            .write_u32(self.send_iv)
            .write_u32(self.block_iv)
            .write_u8(self.patch_type as u8);

        let mut out = [0u8; HANDSHAKE_SIZE];
        out.copy_from_slice(w.as_slice());
        out
    }

    pub fn decode(data: &[u8]) -> NetResult<Self> {
        if data.len() != HANDSHAKE_SIZE {
            return Err(NetError::InvalidHandshake(format!(
                "expected {HANDSHAKE_SIZE} bytes, got {}",
                data.len()
            )));
        }
        let mut r = ByteReader::new(data);
        Ok(Self {
            opcode: r.read_u16()?,
            version: r.read_u32()?,
            recv_iv: r.read_u32()?,
            send_iv: r.read_u32()?,
            block_iv: r.read_u32()?,
            patch_type: PatchType::try_from(r.read_u8()?)?,
        })
    }
}
