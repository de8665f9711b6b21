use super::LoginSession;
use crate::router::PacketHandler;
use mnet_core::{opcode, ByteReader, ByteWriter};
use tracing::{debug, warn};

/// `RESPONSE_VERSION`: `[u32 version]`. A matching version promotes the
/// session and moves the client on to the login screen; anything else is
/// disconnected.
pub struct ResponseVersionHandler;

impl PacketHandler<LoginSession> for ResponseVersionHandler {
    fn opcode(&self) -> u16 {
        opcode::RESPONSE_VERSION
    }

    fn handle(&self, session: &mut LoginSession, reader: &mut ByteReader<'_>) {
        let expected = session.server.hooks().version();
        let version = match reader.read_u32() {
            Ok(version) => version,
            Err(e) => {
                warn!(session = %session.transport, error = %e, "malformed version response");
                session.transport.disconnect();
                return;
            }
        };
        if version != expected {
            warn!(session = %session.transport, version, expected, "client version mismatch");
            session.transport.disconnect();
            return;
        }

        if session.server.mark_connected(&session.transport) {
            let mut packet = ByteWriter::of(opcode::REQUEST_LOGIN);
            packet.write_u8(1);
            session.transport.send(packet.as_slice());
        }
    }
}

/// `RESPONSE_HEARTBEAT`: `[u32 tick]`, echoed back to the client.
pub struct ResponseHeartbeatHandler;

impl PacketHandler<LoginSession> for ResponseHeartbeatHandler {
    fn opcode(&self) -> u16 {
        opcode::RESPONSE_HEARTBEAT
    }

    fn handle(&self, session: &mut LoginSession, reader: &mut ByteReader<'_>) {
        let tick = match reader.read_u32() {
            Ok(tick) => tick,
            Err(e) => {
                debug!(session = %session.transport, error = %e, "ignoring short heartbeat");
                return;
            }
        };
        session.last_tick = Some(tick);

        let mut packet = ByteWriter::of(opcode::REQUEST_HEARTBEAT);
        packet.write_u32(tick);
        session.transport.send(packet.as_slice());
    }
}
