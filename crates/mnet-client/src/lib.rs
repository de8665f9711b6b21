//! mnet-client: async client for the mnet game transport.
//!
//! Reads the server's unencrypted handshake, keys both cipher directions
//! from it, then sends and receives whole packets.
//!
//! # Quick Start
//!
//! ```no_run
//! use mnet_client::GameClient;
//! use mnet_core::{opcode, ByteWriter, XorStreamCipher};
//!
//! # async fn example() -> mnet_core::NetResult<()> {
//! let mut client = GameClient::connect("127.0.0.1:20001", &XorStreamCipher::new()).await?;
//!
//! let mut packet = ByteWriter::of(opcode::RESPONSE_VERSION);
//! packet.write_u32(client.handshake().version);
//! client.send(packet.as_slice()).await?;
//!
//! if let Some(frame) = client.recv().await? {
//!     println!("got opcode 0x{:04X}", frame.opcode());
//! }
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::GameClient;
