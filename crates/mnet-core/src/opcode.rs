//! Opcodes the transport itself knows about.
//!
//! Everything else belongs to the handler sets of individual servers.

/// Server → client: the unencrypted handshake record.
pub const REQUEST_VERSION: u16 = 0x0001;

/// Client → server: version acknowledgement, first encrypted packet.
pub const RESPONSE_VERSION: u16 = 0x0001;

/// Client → server: keepalive tick.
pub const RESPONSE_HEARTBEAT: u16 = 0x0002;

/// Server → client: keepalive tick.
pub const REQUEST_HEARTBEAT: u16 = 0x0002;

/// Server → client: a notice that the client is about to be disconnected.
pub const NOTICE_DISCONNECT: u16 = 0x0003;

/// Server → client: login stage acknowledgement after a valid version.
pub const REQUEST_LOGIN: u16 = 0x0004;
