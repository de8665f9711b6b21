//! Session registry for a listener.
//!
//! Sessions enter as *connecting* when accepted and move to *connected*
//! once the game layer accepts them (e.g. after a version check). Teardown
//! removes a session from whichever set holds it. The registry is touched
//! from runtime workers and session threads alike, so it uses a plain
//! blocking lock and never calls into a session while holding it.

use crate::session::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct Sessions {
    connecting: HashMap<u64, Arc<Session>>,
    connected: HashMap<u64, Arc<Session>>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Sessions>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connecting(&self, session: Arc<Session>) {
        let id = session.id();
        self.inner.lock().connecting.insert(id, session);
        debug!(session_id = id, "session registered as connecting");
    }

    /// Promote a session to connected. Returns false if the session is
    /// unknown or already torn down.
    pub fn mark_connected(&self, session: &Arc<Session>) -> bool {
        let mut inner = self.inner.lock();
        // Checked under the lock: teardown sets the flag before it removes
        // the session, so a disposed session is never re-inserted.
        if session.is_disposed() {
            return false;
        }
        let id = session.id();
        inner.connecting.remove(&id);
        inner.connected.insert(id, session.clone());
        true
    }

    /// Remove a session from both sets.
    pub fn remove(&self, id: u64) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock();
        let connecting = inner.connecting.remove(&id);
        let connected = inner.connected.remove(&id);
        connected.or(connecting)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Session>> {
        let inner = self.inner.lock();
        inner
            .connected
            .get(&id)
            .or_else(|| inner.connecting.get(&id))
            .cloned()
    }

    pub fn is_connected(&self, id: u64) -> bool {
        self.inner.lock().connected.contains_key(&id)
    }

    /// Snapshot of the connected sessions.
    pub fn connected(&self) -> Vec<Arc<Session>> {
        self.inner.lock().connected.values().cloned().collect()
    }

    /// Snapshot of every session, connecting or connected.
    pub fn all(&self) -> Vec<Arc<Session>> {
        let inner = self.inner.lock();
        inner
            .connecting
            .values()
            .chain(inner.connected.values())
            .cloned()
            .collect()
    }

    /// Send `packet` to every connected session. Returns how many sessions
    /// it was queued for.
    pub fn broadcast(&self, packet: &[u8]) -> usize {
        let targets = self.connected();
        for session in &targets {
            session.send(packet);
        }
        targets.len()
    }

    pub fn connecting_count(&self) -> usize {
        self.inner.lock().connecting.len()
    }

    pub fn connected_count(&self) -> usize {
        self.inner.lock().connected.len()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.connecting.len() + inner.connected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
