//! Client side of a connection.

use bytes::{Buf, BytesMut};
use mnet_core::{
    opcode, BufferPool, CipherParams, CipherSuite, Frame, FrameDecryptor, FrameEncryptor,
    Handshake, NetError, NetResult, HANDSHAKE_SIZE,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, trace};

pub struct GameClient {
    stream: TcpStream,
    handshake: Handshake,
    encryptor: Box<dyn FrameEncryptor>,
    decryptor: Box<dyn FrameDecryptor>,
    buffer: BytesMut,
}

impl GameClient {
    /// Connect and complete the handshake.
    pub async fn connect(addr: impl ToSocketAddrs, suite: &dyn CipherSuite) -> NetResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::from_stream(stream, suite).await
    }

    /// Complete the handshake on an already connected stream.
    pub async fn from_stream(mut stream: TcpStream, suite: &dyn CipherSuite) -> NetResult<Self> {
        let mut raw = [0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut raw).await?;
        let handshake = Handshake::decode(&raw)?;
        if handshake.opcode != opcode::REQUEST_VERSION {
            return Err(NetError::InvalidHandshake(format!(
                "unexpected opcode 0x{:04X}",
                handshake.opcode
            )));
        }
        debug!(
            version = handshake.version,
            patch_type = %handshake.patch_type,
            "handshake received"
        );

        // The server's receive IV keys our sends, and vice versa.
        let encryptor = suite.encryptor(CipherParams {
            version: handshake.version,
            iv: handshake.recv_iv,
            block_iv: handshake.block_iv,
        });
        let decryptor = suite.decryptor(
            CipherParams {
                version: handshake.version,
                iv: handshake.send_iv,
                block_iv: handshake.block_iv,
            },
            BufferPool::new(),
        );

        Ok(Self {
            stream,
            handshake,
            encryptor,
            decryptor,
            buffer: BytesMut::with_capacity(4096),
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Encrypt one packet without sending it.
    pub fn encrypt(&mut self, packet: &[u8]) -> NetResult<Vec<u8>> {
        self.encryptor.encrypt(packet)
    }

    /// Encrypt and send one packet.
    pub async fn send(&mut self, packet: &[u8]) -> NetResult<()> {
        let wire = self.encryptor.encrypt(packet)?;
        trace!(len = packet.len(), "send");
        self.stream.write_all(&wire).await?;
        Ok(())
    }

    /// Write bytes as-is, e.g. pre-encrypted or deliberately broken input.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> NetResult<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Write bytes in `chunk`-sized writes, flushing after each one.
    pub async fn send_raw_chunked(&mut self, bytes: &[u8], chunk: usize) -> NetResult<()> {
        for piece in bytes.chunks(chunk.max(1)) {
            self.stream.write_all(piece).await?;
            self.stream.flush().await?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Next packet from the server, or `None` once the server has closed
    /// the connection.
    pub async fn recv(&mut self) -> NetResult<Option<Frame>> {
        loop {
            let decrypted = self.decryptor.decrypt(&self.buffer)?;
            if decrypted.consumed > 0 {
                self.buffer.advance(decrypted.consumed.min(self.buffer.len()));
                match decrypted.frame {
                    Some(frame) => return Ok(Some(frame)),
                    None => continue,
                }
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }

    /// Close the write side; the server sees end of stream.
    pub async fn close(mut self) -> NetResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
