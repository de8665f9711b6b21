//! Login server: the smallest useful connection type on top of the
//! transport. It checks the client's version, promotes the session to
//! connected and answers heartbeats.

mod handlers;

pub use handlers::{ResponseHeartbeatHandler, ResponseVersionHandler};

use crate::config::ListenerConfig;
use crate::router::{Connection, PacketHandler, Router};
use crate::server::{Server, ServerHooks};
use crate::session::Session;
use mnet_core::{opcode, ByteWriter, CipherSuite, NetResult};
use std::sync::Arc;
use tracing::info;

/// Text shown to clients when the server shuts down.
pub const STOP_NOTICE: &str = "Server Maintenance";

pub struct LoginHooks {
    version: u32,
}

impl LoginHooks {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl ServerHooks for LoginHooks {
    type Session = LoginSession;

    fn kind(&self) -> &'static str {
        "LoginSession"
    }

    fn create_session(&self, server: &Arc<Server<Self>>, transport: Arc<Session>) -> LoginSession {
        LoginSession {
            server: server.clone(),
            transport,
            last_tick: None,
        }
    }

    fn on_connected(&self, session: &Arc<Session>) {
        info!(session = %session, "client logged in");
    }

    fn on_disconnected(&self, session: &Session) {
        info!(session = %session, "client left");
    }

    fn stop_notice(&self) -> Option<Vec<u8>> {
        let mut packet = ByteWriter::of(opcode::NOTICE_DISCONNECT);
        packet.write_string(STOP_NOTICE);
        Some(packet.into_inner())
    }
}

/// Per-connection login state, owned by the session thread.
pub struct LoginSession {
    server: Arc<Server<LoginHooks>>,
    transport: Arc<Session>,
    last_tick: Option<u32>,
}

impl LoginSession {
    pub fn transport(&self) -> &Arc<Session> {
        &self.transport
    }

    pub fn last_tick(&self) -> Option<u32> {
        self.last_tick
    }
}

impl Connection for LoginSession {}

/// The login handler set.
pub fn router() -> NetResult<Router<LoginSession>> {
    let handlers: Vec<Box<dyn PacketHandler<LoginSession>>> = vec![
        Box::new(ResponseVersionHandler),
        Box::new(ResponseHeartbeatHandler),
    ];
    Router::new(handlers)
}

/// Build a login server for `config`.
pub fn server(config: ListenerConfig, cipher: Arc<dyn CipherSuite>) -> NetResult<Arc<Server<LoginHooks>>> {
    let hooks = LoginHooks::new(config.transport.version);
    Ok(Server::new(config, hooks, router()?, cipher))
}
