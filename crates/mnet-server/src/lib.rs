//! mnet-server: game server network transport.
//!
//! Accepts TCP connections, performs the unencrypted handshake, decrypts
//! and reassembles framed packets, and dispatches them by opcode on a
//! dedicated per-session thread. The `login` module wires the transport up
//! as a minimal login server.

pub mod completion;
pub mod config;
pub mod login;
pub mod pipe;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use config::{ListenerConfig, ServerConfig, TransportConfig};
pub use registry::SessionRegistry;
pub use router::{Connection, Dispatcher, PacketHandler, Router};
pub use server::{Health, Server, ServerHooks, ServerState};
pub use session::{FrameSink, Session, SessionOptions, SessionState};
