//! Connection state machine.
//!
//! A [`Connection`] owns one TCP stream to a server. Once connected it runs
//! two tasks per connection generation:
//!
//! 1. A receive task that reads into a growable [`ByteCursorBuffer`], drains
//!    every complete frame and hands each one to the [`Dispatch`]er inline,
//!    in wire order
//! 2. A writer task (see [`crate::writer`]) that writes queued packets
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ok──► Connected
//!      ▲                          │                  │
//!      │◄────────failure──────────┘                  │ peer close / socket fault /
//!      │                                             │ desync / unresolved type /
//!      └──────────── Disconnecting ◄─────────────────┘ disconnect()
//! ```
//!
//! Any fatal error funnels into the same teardown: the generation counter is
//! bumped, both tasks are aborted (dropping the socket halves and returning
//! pooled buffers), the session id is cleared and a
//! [`ConnectionEvent::Disconnected`] is broadcast. Completions that arrive
//! for an older generation are ignored.
//!
//! # Example
//!
//! ```ignore
//! use framelink::{Connection, MessageRegistry};
//!
//! let connection = Connection::builder()
//!     .host("127.0.0.1")
//!     .port(7777)
//!     .dispatcher(MessageRegistry::new())
//!     .start()
//!     .await?;
//!
//! connection.send("MsgChat_CS", br#"{"text":"hi"}"#).await?;
//! connection.disconnect();
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::ByteCursorBuffer;
use crate::codec::JsonCodec;
use crate::config::ConnectionConfig;
use crate::dispatch::{Dispatch, Message};
use crate::error::{DisconnectReason, FramelinkError, Result};
use crate::pool::ObjectPool;
use crate::protocol::{Decoded, FrameCodec, PayloadTransform};
use crate::stats::{ConnectionStats, Counters};
use crate::transport;
use crate::writer::{spawn_writer_task, OutboundPacket, WriterHandle};

/// Initial capacity of pooled outbound packet buffers.
const PACKET_BUFFER_CAPACITY: usize = 256;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Notification broadcast to [`Connection::subscribe`]rs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The connection was torn down.
    Disconnected(DisconnectReason),
    /// A connect attempt failed; the connection stays disconnected.
    ConnectFailed(String),
}

/// Tasks and queue of one live connection generation.
struct Link {
    writer: WriterHandle,
    receive_task: JoinHandle<()>,
    writer_task: AbortHandle,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

impl Link {
    fn abort(self) {
        self.receive_task.abort();
        self.writer_task.abort();
    }
}

struct Control {
    state: ConnectionState,
    link: Option<Link>,
    session_id: Option<String>,
}

struct Shared {
    config: ConnectionConfig,
    codec: FrameCodec,
    dispatcher: Arc<dyn Dispatch>,
    packet_pool: ObjectPool<ByteCursorBuffer>,
    control: Mutex<Control>,
    /// Bumped on every connect attempt and every teardown; written under `control`.
    generation: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
    counters: Arc<Counters>,
}

impl Shared {
    #[inline]
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, control: &mut Control, to: ConnectionState) {
        let from = std::mem::replace(&mut control.state, to);
        debug!(%from, %to, "Connection state changed");
        self.emit(ConnectionEvent::StateChanged { from, to });
    }

    /// Tear down whatever is live. No-op when already disconnected.
    fn teardown(&self, control: &mut Control, reason: DisconnectReason) -> bool {
        if control.state == ConnectionState::Disconnected {
            return false;
        }

        self.generation.fetch_add(1, Ordering::AcqRel);
        self.transition(control, ConnectionState::Disconnecting);

        let peer = control.link.as_ref().and_then(|link| link.peer);
        if let Some(link) = control.link.take() {
            link.abort();
        }
        control.session_id = None;

        self.transition(control, ConnectionState::Disconnected);
        info!(peer = ?peer, reason = %reason, "Disconnected");
        self.emit(ConnectionEvent::Disconnected(reason));
        true
    }

    /// Fatal error reported by a task of `generation`.
    fn fail(&self, generation: u64, err: FramelinkError) {
        let mut control = self.control.lock();
        if !self.is_current(generation) {
            debug!(generation, error = %err, "Ignoring completion from stale connection");
            return;
        }

        let reason = err
            .disconnect_reason()
            .unwrap_or_else(|| DisconnectReason::SocketFault(err.to_string()));
        match &reason {
            DisconnectReason::PeerClosed => warn!("Peer closed the connection"),
            DisconnectReason::SocketFault(_) => error!(error = %err, "Socket fault"),
            _ => error!(error = %err, "Protocol failure, dropping connection"),
        }

        self.teardown(&mut control, reason);
    }

    /// Read, decode and dispatch until something fatal happens.
    ///
    /// Returns the error that ended the loop.
    async fn run_receive(&self, generation: u64, mut reader: OwnedReadHalf) -> FramelinkError {
        let mut buffer = ByteCursorBuffer::with_capacity(self.config.receive_buffer_size);

        loop {
            let read = reader.read(buffer.writable_chunk_mut()).await;
            let n = match read {
                Ok(0) => return FramelinkError::PeerClosed,
                Ok(n) => n,
                Err(e) => return FramelinkError::SocketFault(e),
            };
            if let Err(e) = buffer.advance_rear(n) {
                return e.into();
            }
            self.counters.record_read(n);
            trace!(bytes = n, buffered = buffer.len(), "Received bytes");

            loop {
                let frame = match self.codec.try_decode_one(&mut buffer) {
                    Ok(Decoded::Frame(frame)) => frame,
                    Ok(Decoded::Incomplete) => break,
                    Err(e) => return e,
                };

                // disconnect() may have run while the previous frame was dispatched
                if !self.is_current(generation) {
                    return FramelinkError::ConnectionClosed;
                }

                self.counters.record_frame_received();
                trace!(type_name = %frame.type_name, bytes = frame.payload.len(), "Dispatching frame");

                if let Err(e) = self.dispatcher.on_message(&frame.type_name, frame.payload) {
                    if e.disconnect_reason().is_some() {
                        return e;
                    }
                    warn!(type_name = %frame.type_name, error = %e, "Message handler failed");
                }
            }

            if buffer.is_full() {
                let capacity = buffer.capacity() * 2;
                if let Err(e) = buffer.grow(capacity) {
                    return e.into();
                }
                debug!(capacity, "Grew receive buffer");
            }
        }
    }
}

/// A single client connection.
///
/// Dropping the `Connection` disconnects it. Share it behind an `Arc` when
/// several tasks need to send.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Create a disconnected connection.
    pub fn new(config: ConnectionConfig, dispatcher: impl Dispatch) -> Result<Self> {
        Self::with_parts(config, Arc::new(dispatcher), None)
    }

    fn with_parts(
        config: ConnectionConfig,
        dispatcher: Arc<dyn Dispatch>,
        transform: Option<Arc<dyn PayloadTransform>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut codec = config.codec();
        if let Some(transform) = transform {
            codec = codec.with_transform(transform);
        }
        let packet_pool = ObjectPool::with_capacity(config.packet_pool_size, || {
            ByteCursorBuffer::with_capacity(PACKET_BUFFER_CAPACITY)
        });
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                codec,
                dispatcher,
                packet_pool,
                control: Mutex::new(Control {
                    state: ConnectionState::Disconnected,
                    link: None,
                    session_id: None,
                }),
                generation: AtomicU64::new(0),
                events,
                counters: Arc::new(Counters::default()),
            }),
        })
    }

    /// Connect if `auto_connect` is set.
    ///
    /// A failed attempt is logged and reported as
    /// [`ConnectionEvent::ConnectFailed`]; the connection stays disconnected.
    pub async fn start(&self) {
        if !self.shared.config.auto_connect {
            debug!("Auto-connect disabled");
            return;
        }
        if let Err(e) = self.connect().await {
            warn!(error = %e, "Auto-connect failed");
        }
    }

    /// Open the socket and start the receive and writer tasks.
    ///
    /// Returns `Ok` without opening a second socket when already connecting
    /// or connected. There is no automatic retry.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        let generation = {
            let mut control = shared.control.lock();
            if control.state != ConnectionState::Disconnected {
                debug!(state = %control.state, "Connect ignored");
                return Ok(());
            }
            let generation = shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
            shared.transition(&mut control, ConnectionState::Connecting);
            generation
        };

        let addr = shared.config.remote_addr();
        let result = transport::connect(
            &addr,
            shared.config.connect_timeout(),
            shared.config.nodelay,
            shared.config.linger(),
        )
        .await;

        let mut control = shared.control.lock();
        if !shared.is_current(generation) || control.state != ConnectionState::Connecting {
            debug!(peer = %addr, "Connect completed after disconnect, discarding socket");
            return Err(FramelinkError::ConnectionClosed);
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!(peer = %addr, error = %e, "Connect failed");
                shared.transition(&mut control, ConnectionState::Disconnected);
                shared.emit(ConnectionEvent::ConnectFailed(e.to_string()));
                return Err(e);
            }
        };

        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        let (read_half, write_half) = stream.into_split();

        let (writer, task) =
            spawn_writer_task(write_half, &shared.config.writer, shared.counters.clone());
        let writer_task = task.abort_handle();
        {
            let shared = shared.clone();
            // A failed write ends the connection; an aborted writer reports nothing
            tokio::spawn(async move {
                if let Ok(Err(e)) = task.await {
                    shared.fail(generation, e);
                }
            });
        }
        let receive_task = {
            let shared = shared.clone();
            tokio::spawn(async move {
                let err = shared.run_receive(generation, read_half).await;
                shared.fail(generation, err);
            })
        };

        control.link = Some(Link {
            writer,
            receive_task,
            writer_task,
            peer,
            local,
        });
        shared.transition(&mut control, ConnectionState::Connected);
        info!(peer = %addr, generation, "Connected");
        Ok(())
    }

    /// Close the connection. Calling it while disconnected does nothing.
    ///
    /// Returns `true` if this call performed the teardown.
    pub fn disconnect(&self) -> bool {
        let mut control = self.shared.control.lock();
        self.shared.teardown(&mut control, DisconnectReason::Requested)
    }

    fn writer(&self) -> Result<WriterHandle> {
        let control = self.shared.control.lock();
        match (&control.state, &control.link) {
            (ConnectionState::Connected, Some(link)) if link.writer.is_closed() => {
                Err(FramelinkError::ConnectionClosed)
            }
            (ConnectionState::Connected, Some(link)) => Ok(link.writer.clone()),
            _ => Err(FramelinkError::NotConnected),
        }
    }

    fn encode_packet(&self, type_name: &str, payload: &[u8]) -> Result<OutboundPacket> {
        let mut buffer = self.shared.packet_pool.allocate();
        self.shared
            .codec
            .encode_into(type_name, payload, &mut buffer)?;
        Ok(OutboundPacket::new(buffer))
    }

    /// Frame `payload` under `type_name` and queue it for writing.
    ///
    /// Waits while the writer is backlogged. Concurrent sends are not
    /// ordered relative to each other.
    pub async fn send(&self, type_name: &str, payload: &[u8]) -> Result<()> {
        let writer = self.writer()?;
        let packet = self.encode_packet(type_name, payload)?;
        writer.send(packet).await
    }

    /// Like [`send`](Self::send), but only serializes once connected.
    pub async fn send_with<F, B>(&self, type_name: &str, encode: F) -> Result<()>
    where
        F: FnOnce() -> B,
        B: AsRef<[u8]>,
    {
        let writer = self.writer()?;
        let payload = encode();
        let packet = self.encode_packet(type_name, payload.as_ref())?;
        writer.send(packet).await
    }

    /// Serialize `message` as JSON and send it under `M::TYPE_NAME`.
    pub async fn send_message<M: Message>(&self, message: &M) -> Result<()> {
        let writer = self.writer()?;
        let payload = JsonCodec::encode(message)?;
        let packet = self.encode_packet(M::TYPE_NAME, &payload)?;
        writer.send(packet).await
    }

    /// Queue without waiting; fails with `BackpressureTimeout` when backlogged.
    pub fn try_send(&self, type_name: &str, payload: &[u8]) -> Result<()> {
        let writer = self.writer()?;
        if writer.is_backpressure_active() {
            return Err(FramelinkError::BackpressureTimeout);
        }
        let packet = self.encode_packet(type_name, payload)?;
        writer.try_send(packet)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.control.lock().state
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Remote address of the live socket.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared
            .control
            .lock()
            .link
            .as_ref()
            .and_then(|link| link.peer)
    }

    /// Local address of the live socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .control
            .lock()
            .link
            .as_ref()
            .and_then(|link| link.local)
    }

    /// Session id assigned by the application after its handshake.
    pub fn session_id(&self) -> Option<String> {
        self.shared.control.lock().session_id.clone()
    }

    /// Record the session id for the live connection. Cleared on teardown.
    pub fn set_session_id(&self, session_id: impl Into<String>) -> Result<()> {
        let mut control = self.shared.control.lock();
        if control.state != ConnectionState::Connected {
            return Err(FramelinkError::NotConnected);
        }
        control.session_id = Some(session_id.into());
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.counters.snapshot()
    }

    /// Packets queued on the writer and not yet written.
    pub fn pending_packets(&self) -> usize {
        self.writer().map(|w| w.pending_count()).unwrap_or(0)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote", &self.shared.config.remote_addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Connection`].
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    dispatcher: Option<Arc<dyn Dispatch>>,
    transform: Option<Arc<dyn PayloadTransform>>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
            dispatcher: None,
            transform: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Initial receive buffer capacity.
    ///
    /// Default: 1024
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    /// Outbound packet buffers created up front.
    ///
    /// Default: 64
    pub fn packet_pool_size(mut self, size: usize) -> Self {
        self.config.packet_pool_size = size;
        self
    }

    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.config.auto_connect = enabled;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// `SO_LINGER` for the socket. `Some(Duration::ZERO)` resets on close.
    pub fn linger(mut self, linger: Option<Duration>) -> Self {
        self.config.linger_ms = linger.map(|t| t.as_millis() as u64);
        self
    }

    /// Receiver for every decoded frame.
    pub fn dispatcher(mut self, dispatcher: impl Dispatch) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn transform(mut self, transform: Arc<dyn PayloadTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Build a disconnected connection.
    pub fn build(self) -> Result<Connection> {
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| FramelinkError::Config("a dispatcher is required".into()))?;
        Connection::with_parts(self.config, dispatcher, self.transform)
    }

    /// Build, then [`start`](Connection::start).
    pub async fn start(self) -> Result<Connection> {
        let connection = self.build()?;
        connection.start().await;
        Ok(connection)
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
