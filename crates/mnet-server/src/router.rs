//! Opcode router.
//!
//! A [`Router`] is built once per connection type from that type's handler
//! set and then shared, read-only, by every session of the type. Dispatch
//! reads the frame's little-endian opcode and hands the handler a reader
//! positioned just after it. Unknown opcodes are dropped so newer clients
//! can send packets this server does not understand yet.

use crate::session::{FrameSink, Session};
use mnet_core::{ByteReader, Frame, NetError, NetResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A stateless packet handler for connection type `S`.
///
/// Everything a handler touches per connection comes from the `session`
/// argument, which is only ever borrowed on that connection's session
/// thread.
pub trait PacketHandler<S>: Send + Sync {
    /// The opcode this handler is registered under.
    fn opcode(&self) -> u16;

    /// Handle one packet; `reader` starts at the first payload byte.
    fn handle(&self, session: &mut S, reader: &mut ByteReader<'_>);

    /// Name used in startup logs and registration errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Immutable opcode → handler table.
pub struct Router<S> {
    handlers: HashMap<u16, Box<dyn PacketHandler<S>>>,
}

impl<S> Router<S> {
    /// Build the table. Two handlers claiming one opcode is a configuration
    /// bug and fails the build.
    pub fn new(handlers: Vec<Box<dyn PacketHandler<S>>>) -> NetResult<Self> {
        let mut table: HashMap<u16, Box<dyn PacketHandler<S>>> =
            HashMap::with_capacity(handlers.len());

        for handler in handlers {
            let opcode = handler.opcode();
            if let Some(existing) = table.get(&opcode) {
                return Err(NetError::DuplicateOpcode {
                    opcode,
                    existing: existing.name(),
                    duplicate: handler.name(),
                });
            }
            table.insert(opcode, handler);
        }

        let mut opcodes: Vec<u16> = table.keys().copied().collect();
        opcodes.sort_unstable();
        for opcode in opcodes {
            if let Some(handler) = table.get(&opcode) {
                debug!(opcode = %format_args!("0x{opcode:04X}"), handler = handler.name(), "registered handler");
            }
        }

        Ok(Self { handlers: table })
    }

    /// Route one frame. Returns whether a handler ran.
    pub fn dispatch(&self, session: &mut S, frame: &Frame) -> bool {
        let opcode = frame.opcode();
        match self.handlers.get(&opcode) {
            Some(handler) => {
                let mut reader = frame.reader();
                handler.handle(session, &mut reader);
                true
            }
            None => {
                trace!(opcode = %format_args!("0x{opcode:04X}"), len = frame.len(), "no handler for opcode");
                false
            }
        }
    }

    pub fn contains(&self, opcode: u16) -> bool {
        self.handlers.contains_key(&opcode)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Per-connection state that a session thread owns for its whole life.
pub trait Connection: Send + 'static {
    /// Runs on the session thread after each batch of queued work.
    fn on_loop(&mut self) {}
}

/// A shared router paired with one connection's state; installed as the
/// session's frame sink.
pub struct Dispatcher<S> {
    router: Arc<Router<S>>,
    state: S,
}

impl<S> Dispatcher<S> {
    pub fn new(router: Arc<Router<S>>, state: S) -> Self {
        Self { router, state }
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S: Connection> FrameSink for Dispatcher<S> {
    fn on_frame(&mut self, _session: &Arc<Session>, frame: &Frame) {
        self.router.dispatch(&mut self.state, frame);
    }

    fn on_loop(&mut self, _session: &Arc<Session>) {
        self.state.on_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnet_core::PooledBuffer;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(u16, Vec<u8>)>,
    }

    struct Record(u16);

    impl PacketHandler<Recorder> for Record {
        fn opcode(&self) -> u16 {
            self.0
        }

        fn handle(&self, session: &mut Recorder, reader: &mut ByteReader<'_>) {
            session.calls.push((self.0, reader.peek_rest().to_vec()));
        }
    }

    fn frame(bytes: &[u8]) -> Frame {
        Frame::new(PooledBuffer::unpooled(bytes.to_vec())).unwrap()
    }

    fn router() -> Router<Recorder> {
        Router::new(vec![Box::new(Record(0x0042)), Box::new(Record(0x0001))]).unwrap()
    }

    #[test]
    fn dispatches_by_little_endian_opcode() {
        let router = router();
        let mut rec = Recorder::default();
        assert!(router.dispatch(&mut rec, &frame(&[0x42, 0x00, 0x01, 0x02])));
        assert_eq!(rec.calls, vec![(0x0042, vec![0x01, 0x02])]);
    }

    #[test]
    fn unknown_opcode_is_dropped() {
        let router = router();
        let mut rec = Recorder::default();
        assert!(!router.dispatch(&mut rec, &frame(&[0x00, 0x42, 0xFF])));
        assert!(!router.dispatch(&mut rec, &frame(&[0xFF, 0xFF])));
        assert!(rec.calls.is_empty());
    }

    #[test]
    fn duplicate_opcode_fails_fast() {
        let result = Router::<Recorder>::new(vec![Box::new(Record(7)), Box::new(Record(7))]);
        match result {
            Err(NetError::DuplicateOpcode { opcode, .. }) => assert_eq!(opcode, 7),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("duplicate opcode accepted"),
        }
    }

    #[test]
    fn empty_payload_reader() {
        let router = router();
        let mut rec = Recorder::default();
        router.dispatch(&mut rec, &frame(&[0x01, 0x00]));
        assert_eq!(rec.calls, vec![(0x0001, vec![])]);
        assert!(router.contains(0x0001));
        assert_eq!(router.len(), 2);
    }
}
