//! Listener: accepts connections on one port and owns their sessions.
//!
//! A [`Server`] is generic over [`ServerHooks`], which supply the
//! connection type's per-session state and lifecycle callbacks. Every
//! accepted socket becomes a [`Session`] that is registered as connecting,
//! handed to the hooks, and started with a [`Dispatcher`] pairing the
//! shared router with the new connection state.

use crate::config::ListenerConfig;
use crate::registry::SessionRegistry;
use crate::router::{Connection, Dispatcher, Router};
use crate::session::{Session, SessionOptions, SessionState};
use futures_util::future::join_all;
use mnet_core::{BufferPool, CipherSuite, NetError, NetResult};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Behavior of one connection type (login, channel, ...).
pub trait ServerHooks: Send + Sync + Sized + 'static {
    /// Per-connection state driven by the router.
    type Session: Connection;

    /// Label used in session log lines.
    fn kind(&self) -> &'static str;

    /// Build the connection state for a freshly accepted session.
    fn create_session(&self, server: &Arc<Server<Self>>, transport: Arc<Session>) -> Self::Session;

    /// Called after the session is registered, before it starts.
    fn add_session(&self, _session: &Arc<Session>) {}

    /// Called when the session is promoted with [`Server::mark_connected`].
    fn on_connected(&self, _session: &Arc<Session>) {}

    /// Called exactly once per session at the end of its teardown.
    fn on_disconnected(&self, _session: &Session) {}

    /// Packet sent to every session when the server shuts down.
    fn stop_notice(&self) -> Option<Vec<u8>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unstarted,
    Running,
    Stopped,
}

/// Health probe result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub healthy: bool,
    pub message: &'static str,
}

pub struct Server<H: ServerHooks> {
    config: ListenerConfig,
    hooks: H,
    router: Arc<Router<H::Session>>,
    cipher: Arc<dyn CipherSuite>,
    pool: BufferPool,
    registry: SessionRegistry,
    state: Mutex<ServerState>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl<H: ServerHooks> Server<H> {
    pub fn new(
        config: ListenerConfig,
        hooks: H,
        router: Router<H::Session>,
        cipher: Arc<dyn CipherSuite>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            hooks,
            router: Arc::new(router),
            cipher,
            pool: BufferPool::new(),
            registry: SessionRegistry::new(),
            state: Mutex::new(ServerState::Unstarted),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Bind the configured address. Failure here is fatal for the listener.
    pub async fn bind(&self) -> NetResult<TcpListener> {
        let listener = TcpListener::bind((self.config.bind, self.config.port)).await?;
        Ok(listener)
    }

    /// Bind and serve until [`Server::stop`].
    pub async fn run(self: Arc<Self>) -> NetResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until [`Server::stop`], then tear
    /// every remaining session down. Returns at once if the server was
    /// stopped before it started serving.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> NetResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ServerState::Unstarted => *state = ServerState::Running,
                ServerState::Running => return Err(NetError::AlreadyStarted),
                ServerState::Stopped => {
                    info!(kind = self.hooks.kind(), "stopped before serving, listener closed");
                    return Ok(());
                }
            }
        }
        let local = listener.local_addr()?;
        info!(kind = self.hooks.kind(), addr = %local, "listener started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = self.accept(stream) {
                            warn!(peer = %peer, error = %e, "failed to start session");
                        }
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        drop(listener);
        self.shutdown_sessions().await;
        info!(kind = self.hooks.kind(), addr = %local, "listener stopped");
        Ok(())
    }

    fn accept(self: &Arc<Self>, stream: TcpStream) -> NetResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(
            id,
            stream,
            SessionOptions {
                kind: self.hooks.kind(),
                patch_type: self.config.patch_type,
                transport: self.config.transport.clone(),
                cipher: self.cipher.clone(),
                pool: self.pool.clone(),
            },
        )?;

        let server: Weak<Self> = Arc::downgrade(self);
        session.set_on_disconnect(move |session| {
            if let Some(server) = server.upgrade() {
                server.session_closed(session);
            }
        });

        self.registry.add_connecting(session.clone());
        self.hooks.add_session(&session);
        info!(session = %session, session_id = id, "client connecting");

        let state = self.hooks.create_session(self, session.clone());
        if let Err(e) = session.start(Dispatcher::new(self.router.clone(), state)) {
            session.disconnect();
            return Err(e);
        }
        Ok(())
    }

    fn session_closed(&self, session: &Session) {
        self.registry.remove(session.id());
        self.hooks.on_disconnected(session);
    }

    /// Promote a session from connecting to connected.
    pub fn mark_connected(&self, session: &Arc<Session>) -> bool {
        if !self.registry.mark_connected(session) || !session.set_state(SessionState::Connected) {
            debug!(session = %session, "not promoting a closed session");
            return false;
        }
        self.hooks.on_connected(session);
        true
    }

    /// Request shutdown. The accept loop exits and every session is torn
    /// down by [`Server::serve`].
    pub fn stop(&self) {
        let mut state = self.state.lock();
        match *state {
            ServerState::Unstarted => info!(kind = self.hooks.kind(), "stopping server that never started"),
            ServerState::Running => info!(kind = self.hooks.kind(), "stopping server"),
            ServerState::Stopped => {
                debug!(kind = self.hooks.kind(), "server already stopped");
                return;
            }
        }
        *state = ServerState::Stopped;
        drop(state);
        self.shutdown.cancel();
    }

    async fn shutdown_sessions(&self) {
        let sessions = self.registry.all();
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "disconnecting sessions");

        let notice = self.hooks.stop_notice();
        let teardowns = sessions.into_iter().map(|session| {
            if let Some(packet) = &notice {
                session.send(packet);
            }
            tokio::task::spawn_blocking(move || session.disconnect())
        });
        for result in join_all(teardowns).await {
            if let Err(e) = result {
                warn!(error = %e, "session teardown task failed");
            }
        }
    }

    pub fn health(&self) -> Health {
        match self.state() {
            ServerState::Running => Health {
                healthy: true,
                message: "running",
            },
            ServerState::Unstarted => Health {
                healthy: false,
                message: "not started",
            },
            ServerState::Stopped => Health {
                healthy: false,
                message: "stopped",
            },
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn broadcast(&self, packet: &[u8]) -> usize {
        self.registry.broadcast(packet)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind, self.config.port)
    }
}
