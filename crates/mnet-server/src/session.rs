//! Session: one accepted client connection.
//!
//! Each session owns three execution contexts:
//!
//! * a **socket pump** task that reads the socket into the receive pipe,
//! * a **writer** task that drains the bounded outbound queue onto the
//!   socket, and
//! * a dedicated OS **session thread** that drains the completion queue.
//!
//! Decryption, reassembly and packet handlers all run on the session
//! thread, so a connection's frames are handled strictly in arrival order
//! and never concurrently. Sends may come from any thread; they are
//! encrypted under a per-session lock so the cipher stream sees packets in
//! exactly the order they are queued for the wire.

use crate::completion::CompletionQueue;
use crate::config::TransportConfig;
use crate::pipe::RecvPipe;
use bytes::{Buf, BytesMut};
use mnet_core::{
    BufferPool, CipherParams, CipherSuite, Frame, FrameDecryptor, FrameEncryptor, Handshake,
    IvPair, NetError, NetResult, PatchType,
};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Application-level lifecycle marker. The transport only ever sets
/// `Connecting` and `Disconnected`; the rest belong to the game layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    ChangeMap = 1,
    Connected = 2,
    Disconnected = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::ChangeMap,
            2 => SessionState::Connected,
            _ => SessionState::Disconnected,
        }
    }
}

/// Receives decoded frames on the session thread.
pub trait FrameSink: Send + 'static {
    /// Called once per frame, in arrival order. The frame's buffer goes back
    /// to the pool when this returns.
    fn on_frame(&mut self, session: &Arc<Session>, frame: &Frame);

    /// Called after each batch of queued work.
    fn on_loop(&mut self, _session: &Arc<Session>) {}
}

impl<F> FrameSink for F
where
    F: FnMut(&Arc<Session>, &Frame) + Send + 'static,
{
    fn on_frame(&mut self, session: &Arc<Session>, frame: &Frame) {
        self(session, frame)
    }
}

/// Everything a session needs besides its socket.
#[derive(Clone)]
pub struct SessionOptions {
    /// Label used in log lines, e.g. `LoginSession`.
    pub kind: &'static str,
    pub patch_type: PatchType,
    pub transport: TransportConfig,
    pub cipher: Arc<dyn CipherSuite>,
    pub pool: BufferPool,
}

type DisconnectHook = Box<dyn FnOnce(&Session) + Send>;

struct SendHalf {
    encryptor: Box<dyn FrameEncryptor>,
    outbound: mpsc::Sender<Vec<u8>>,
}

/// Socket halves and the inbound cipher, held until `start`.
struct PendingIo {
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    outbound: mpsc::Receiver<Vec<u8>>,
    decryptor: Box<dyn FrameDecryptor>,
}

pub struct Session {
    id: u64,
    remote: SocketAddr,
    kind: &'static str,
    patch_type: PatchType,
    ivs: IvPair,
    config: TransportConfig,
    state: AtomicU8,
    started: AtomicBool,
    disposed: AtomicBool,
    peer_closed: AtomicBool,
    send: Mutex<SendHalf>,
    queue: Arc<CompletionQueue<Inbound>>,
    pipe: Arc<RecvPipe<Inbound>>,
    pending: Mutex<Option<PendingIo>>,
    socket: CancellationToken,
    exit: Mutex<Option<std_mpsc::Receiver<()>>>,
    thread_id: OnceLock<ThreadId>,
    on_disconnect: Mutex<Option<DisconnectHook>>,
}

impl Session {
    /// Wrap an accepted socket. Fresh IVs are drawn and the unencrypted
    /// handshake is queued as the very first outbound bytes; nothing moves
    /// on the socket until [`Session::start`].
    pub fn new(id: u64, stream: TcpStream, options: SessionOptions) -> NetResult<Arc<Self>> {
        let remote = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let ivs = IvPair::generate();
        let config = options.transport;
        let encryptor = options.cipher.encryptor(CipherParams {
            version: config.version,
            iv: ivs.send,
            block_iv: config.block_iv,
        });
        let decryptor = options.cipher.decryptor(
            CipherParams {
                version: config.version,
                iv: ivs.recv,
                block_iv: config.block_iv,
            },
            options.pool,
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let handshake = Handshake::new(
            config.version,
            ivs.recv,
            ivs.send,
            config.block_iv,
            options.patch_type,
        );
        outbound_tx
            .try_send(handshake.encode().to_vec())
            .map_err(|_| NetError::Other("outbound queue rejected handshake".into()))?;

        let (read, write) = stream.into_split();
        let queue = Arc::new(CompletionQueue::new());
        let pipe = Arc::new(RecvPipe::new(
            queue.clone(),
            Inbound::resume,
            config.pause_threshold,
        ));

        Ok(Arc::new(Self {
            id,
            remote,
            kind: options.kind,
            patch_type: options.patch_type,
            ivs,
            config,
            state: AtomicU8::new(SessionState::Connecting as u8),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            peer_closed: AtomicBool::new(false),
            send: Mutex::new(SendHalf {
                encryptor,
                outbound: outbound_tx,
            }),
            queue,
            pipe,
            pending: Mutex::new(Some(PendingIo {
                read,
                write,
                outbound: outbound_rx,
                decryptor,
            })),
            socket: CancellationToken::new(),
            exit: Mutex::new(None),
            thread_id: OnceLock::new(),
            on_disconnect: Mutex::new(None),
        }))
    }

    /// Start the session thread and the socket tasks. Must be called from
    /// within a tokio runtime; frames are handed to `sink` on the session
    /// thread.
    pub fn start<S: FrameSink>(self: &Arc<Self>, sink: S) -> NetResult<()> {
        if self.is_disposed() {
            return Err(NetError::Disposed);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| NetError::Runtime(e.to_string()))?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(NetError::AlreadyStarted);
        }
        let io = self.pending.lock().take().ok_or(NetError::Disposed)?;

        let (exit_tx, exit_rx) = std_mpsc::channel::<()>();
        *self.exit.lock() = Some(exit_rx);

        let inbound = Inbound {
            session: self.clone(),
            decryptor: io.decryptor,
            buffer: BytesMut::new(),
            sink: Box::new(sink),
        };
        let session = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("mnet-session-{}", self.id))
            .spawn(move || run_session_thread(session, inbound, exit_tx));
        if let Err(e) = spawned {
            error!(session = %self, error = %e, "failed to spawn session thread");
            self.disconnect();
            return Err(e.into());
        }

        runtime.spawn(write_pump(self.clone(), io.write, io.outbound));
        runtime.spawn(read_pump(self.clone(), io.read));
        debug!(session = %self, "session started");
        Ok(())
    }

    /// Encrypt and queue one packet (opcode included). Safe from any
    /// thread; silently dropped once the session is torn down. A peer that
    /// lets its outbound queue fill up is kicked.
    pub fn send(&self, packet: &[u8]) {
        if self.is_disposed() {
            return;
        }
        self.log_packet("SEND", packet);

        let mut send = self.send.lock();
        let wire = match send.encryptor.encrypt(packet) {
            Ok(wire) => wire,
            Err(e) => {
                drop(send);
                warn!(session = %self, error = %e, "failed to encrypt packet");
                self.kick();
                return;
            }
        };
        match send.outbound.try_send(wire) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                drop(send);
                warn!(
                    session = %self,
                    capacity = self.config.outbound_capacity,
                    "outbound queue full, disconnecting slow peer"
                );
                self.kick();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Whether the socket is still usable.
    pub fn connected(&self) -> bool {
        !self.is_disposed()
            && !self.socket.is_cancelled()
            && !self.peer_closed.load(Ordering::Acquire)
    }

    /// Tear the session down. Idempotent and safe from any thread,
    /// including the session thread itself and packet handlers.
    ///
    /// Blocks for up to the configured stop timeout waiting for the session
    /// thread to exit, so async callers should go through
    /// `spawn_blocking`.
    pub fn disconnect(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session = %self, "disconnected");
        self.state.store(SessionState::Disconnected as u8, Ordering::Release);

        self.pipe.complete();
        self.queue.complete();

        let on_session_thread = self
            .thread_id
            .get()
            .is_some_and(|id| *id == thread::current().id());
        if !on_session_thread {
            let exit = self.exit.lock().take();
            if let Some(exit) = exit {
                if let Err(RecvTimeoutError::Timeout) = exit.recv_timeout(self.config.stop_timeout) {
                    warn!(
                        session = %self,
                        timeout_ms = self.config.stop_timeout.as_millis() as u64,
                        "session thread did not stop in time"
                    );
                }
            }
        }

        self.socket.cancel();
        let pending = self.pending.lock().take();
        drop(pending);

        let hook = self.on_disconnect.lock().take();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    /// Install the callback fired exactly once at the end of teardown.
    pub fn set_on_disconnect<F>(&self, hook: F)
    where
        F: FnOnce(&Session) + Send + 'static,
    {
        *self.on_disconnect.lock() = Some(Box::new(hook));
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn patch_type(&self) -> PatchType {
        self.patch_type
    }

    pub fn version(&self) -> u32 {
        self.config.version
    }

    pub fn block_iv(&self) -> u32 {
        self.config.block_iv
    }

    pub fn ivs(&self) -> IvPair {
        self.ivs
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `state`. Returns false, leaving the state alone, once the
    /// session is `Disconnected`; only teardown sets that state.
    pub fn set_state(&self, state: SessionState) -> bool {
        if state == SessionState::Disconnected {
            return false;
        }
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != SessionState::Disconnected as u8).then_some(state as u8)
            })
            .is_ok()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Force-close the socket; the socket tasks then run teardown.
    fn kick(&self) {
        self.socket.cancel();
    }

    fn disconnect_in_background(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let session = self.clone();
        tokio::task::spawn_blocking(move || session.disconnect());
    }

    fn log_packet(&self, direction: &'static str, packet: &[u8]) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        if is_quiet(&self.config.quiet_opcodes, packet) {
            return;
        }
        trace!(session = %self, len = packet.len(), packet = %hex::encode(packet), "{direction}");
    }
}

/// Whether `packet` carries one of the `quiet` opcodes.
fn is_quiet(quiet: &[u16], packet: &[u8]) -> bool {
    match packet {
        [lo, hi, ..] => quiet.contains(&u16::from_le_bytes([*lo, *hi])),
        _ => false,
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.kind, self.remote)
    }
}

/// Reader-side context, owned by the session thread.
struct Inbound {
    session: Arc<Session>,
    decryptor: Box<dyn FrameDecryptor>,
    buffer: BytesMut,
    sink: Box<dyn FrameSink>,
}

impl Inbound {
    /// Pipe continuation: take the flushed bytes, hand out every complete
    /// frame, keep the remainder for the next flush.
    fn resume(&mut self) {
        let session = self.session.clone();
        let Some(read) = session.pipe.read() else {
            return;
        };
        if self.buffer.is_empty() {
            self.buffer = read.buffer;
        } else {
            self.buffer.extend_from_slice(&read.buffer);
        }

        let sink = &mut self.sink;
        let decoded = decode_frames(
            self.decryptor.as_mut(),
            &mut self.buffer,
            || !session.is_disposed(),
            |frame| {
                session.log_packet("RECV", frame.as_bytes());
                sink.on_frame(&session, &frame);
            },
        );

        if let Err(e) = decoded {
            if !session.is_disposed() {
                error!(session = %session, error = %e, "failed to decode packet");
            }
            session.disconnect();
            return;
        }
        if read.is_completed {
            debug!(session = %session, residual = self.buffer.len(), "peer finished sending");
            session.disconnect();
        }
    }
}

/// Decrypt every complete frame at the front of `buffer`, passing each to
/// `emit` before the next is decoded. Consumed bytes are sliced off;
/// whatever is left is an incomplete frame. Stops early once `keep_going`
/// returns false.
pub(crate) fn decode_frames(
    decryptor: &mut dyn FrameDecryptor,
    buffer: &mut BytesMut,
    mut keep_going: impl FnMut() -> bool,
    mut emit: impl FnMut(Frame),
) -> NetResult<()> {
    while !buffer.is_empty() && keep_going() {
        let decrypted = decryptor.decrypt(buffer)?;
        if decrypted.consumed == 0 {
            break;
        }
        if let Some(frame) = decrypted.frame {
            emit(frame);
        }
        let consumed = decrypted.consumed.min(buffer.len());
        buffer.advance(consumed);
    }
    Ok(())
}

/// Tears the session down when the session thread exits, however it exits.
struct TeardownGuard<'a>(&'a Session);

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        self.0.disconnect();
    }
}

fn run_session_thread(session: Arc<Session>, mut inbound: Inbound, _exit: std_mpsc::Sender<()>) {
    let _ = session.thread_id.set(thread::current().id());
    let _teardown = TeardownGuard(&session);
    let queue = session.queue.clone();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        while !session.is_disposed() && queue.await_work() {
            queue.drain(&mut inbound);
            inbound.sink.on_loop(&session);
        }
    }));

    if let Err(payload) = result {
        if !session.is_disposed() {
            error!(session = %session, panic = panic_message(&*payload), "session thread panicked");
        }
    }
    trace!(session = %session, "session thread exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

async fn read_pump(session: Arc<Session>, mut reader: OwnedReadHalf) {
    let mut buf = vec![0u8; session.config.read_buffer_size.max(1)];
    loop {
        let read = tokio::select! {
            _ = session.socket.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                debug!(session = %session, "peer closed connection");
                session.peer_closed.store(true, Ordering::Release);
                // Teardown happens on the session thread once the buffered
                // bytes have been decoded.
                session.pipe.complete_writer();
                return;
            }
            Ok(n) => {
                let flush = session.pipe.write(&buf[..n]);
                if flush.is_completed {
                    break;
                }
                if flush.is_paused {
                    trace!(session = %session, buffered = session.pipe.buffered(), "receive paused");
                    tokio::select! {
                        _ = session.socket.cancelled() => break,
                        _ = session.pipe.resumed() => {}
                    }
                }
            }
            Err(e) => {
                let e = NetError::from(e);
                if session.is_disposed() || e.is_disconnect() {
                    debug!(session = %session, error = %e, "socket read ended");
                } else {
                    warn!(session = %session, error = %e, "socket read failed");
                }
                break;
            }
        }
    }
    session.disconnect_in_background();
}

async fn write_pump(
    session: Arc<Session>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) {
    let timeout = session.config.write_timeout;
    loop {
        tokio::select! {
            biased;
            packet = outbound.recv() => {
                let Some(packet) = packet else { break };
                if let Err(e) = write_packet(&mut writer, &packet, timeout).await {
                    report_write_error(&session, &e);
                    break;
                }
            }
            _ = session.socket.cancelled() => {
                // Flush what was queued before the close.
                outbound.close();
                while let Ok(packet) = outbound.try_recv() {
                    if write_packet(&mut writer, &packet, timeout).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = tokio::time::timeout(timeout, writer.shutdown()).await;
    session.socket.cancel();
    session.disconnect_in_background();
}

async fn write_packet(writer: &mut OwnedWriteHalf, packet: &[u8], timeout: Duration) -> NetResult<()> {
    match tokio::time::timeout(timeout, writer.write_all(packet)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(NetError::Timeout),
    }
}

fn report_write_error(session: &Session, e: &NetError) {
    match e {
        NetError::Timeout => warn!(session = %session, "write timed out, disconnecting slow peer"),
        e if session.is_disposed() || e.is_disconnect() => {
            debug!(session = %session, error = %e, "socket write ended")
        }
        e => warn!(session = %session, error = %e, "socket write failed"),
    }
}
