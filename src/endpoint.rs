//! The socket-owning engine: peer table, connection handshake, packing and
//! the driver loop. [`Server`] and [`Client`] are thin role-specific
//! wrappers around the shared [`Endpoint`] (spec.md §2, §4.6).

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::bitfield::BitField;
use crate::byte_buffer::ByteBuffer;
use crate::control::{self, ControlKind};
use crate::error::ConfigError;
use crate::event::Event;
use crate::measurement::Measurement;
use crate::message::{FieldValue, Message, MessageDescriptor};
use crate::peer::{Disposition, Peer};
use crate::registry::Registry;
use crate::transport_message::TransportMessage;

/// Retransmit cooldown used until a peer's ping sampler has a real RTT
/// estimate (spec.md §4.5).
const DEFAULT_RETRANSMIT_COOLDOWN: Duration = Duration::from_millis(200);

/// How often the reader context wakes up to check for shutdown. Plain
/// blocking `recv_from` has no way to be interrupted from another thread,
/// so the socket carries a read timeout and the loop polls a flag instead.
const READER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Tunable defaults for one endpoint (spec.md §6 "Defaults").
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub mtu: u16,
    pub timeout: Duration,
    pub ping_interval: Duration,
    pub duplicate_window: usize,
    pub ping_samples: usize,
    pub protocol_version: i32,
}

impl EndpointConfig {
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    pub fn with_duplicate_window(mut self, duplicate_window: usize) -> Self {
        self.duplicate_window = duplicate_window;
        self
    }

    pub fn with_ping_samples(mut self, ping_samples: usize) -> Self {
        self.ping_samples = ping_samples;
        self
    }

    pub fn with_protocol_version(mut self, protocol_version: i32) -> Self {
        self.protocol_version = protocol_version;
        self
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            mtu: 1400,
            timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(2),
            duplicate_window: 1000,
            ping_samples: 5,
            protocol_version: crate::PROTOCOL_VERSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Disconnected,
    Listening,
    Connecting,
    Connected,
}

/// A pending item drained by [`Endpoint::update`] into a user-facing event.
enum InboxItem {
    User(Message, Arc<Peer>),
    Connect(Arc<Peer>),
    Disconnect(Option<Arc<Peer>>),
    Timeout(Arc<Peer>),
}

/// The shared engine behind both [`Server`] and [`Client`].
///
/// Two contexts touch this concurrently (spec.md §5): a background reader
/// thread that blocks on `socket.recv_from` and decodes datagrams, and the
/// host's own thread calling [`Endpoint::update`]. All shared state is
/// behind `parking_lot::Mutex` or an atomic, matching the teacher's
/// lock-per-structure discipline rather than a single global lock.
pub struct Endpoint {
    socket: UdpSocket,
    config: EndpointConfig,
    is_server: bool,

    registry: Mutex<Registry>,
    peers: Mutex<HashMap<u64, Arc<Peer>>>,
    next_peer_id: AtomicU64,
    seq_counter: Arc<AtomicU64>,

    inbox_tx: flume::Sender<InboxItem>,
    inbox_rx: flume::Receiver<InboxItem>,

    state: Mutex<EndpointState>,
    accepting: AtomicBool,
    pending_disconnect: AtomicBool,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,

    client_peer: Mutex<Option<Arc<Peer>>>,
    connecting_placeholder: Mutex<Option<Arc<Peer>>>,
    pending_reliable: Mutex<VecDeque<TransportMessage>>,

    on_message: Mutex<Event<(Message, Arc<Peer>)>>,
    on_connect: Mutex<Event<Arc<Peer>>>,
    on_disconnect: Mutex<Event<Option<Arc<Peer>>>>,
    on_timeout: Mutex<Event<Arc<Peer>>>,

    bytes_in: Mutex<Measurement>,
    bytes_out: Mutex<Measurement>,
    packets_in: Mutex<Measurement>,
    packets_out: Mutex<Measurement>,
    messages_in: Mutex<Measurement>,
    messages_out: Mutex<Measurement>,
}

impl Endpoint {
    fn new(is_server: bool, socket: UdpSocket, config: EndpointConfig) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = flume::unbounded();
        Arc::new(Self {
            socket,
            config,
            is_server,
            registry: Mutex::new(Registry::new()),
            peers: Mutex::new(HashMap::new()),
            next_peer_id: AtomicU64::new(0),
            seq_counter: Arc::new(AtomicU64::new(0)),
            inbox_tx,
            inbox_rx,
            state: Mutex::new(EndpointState::Disconnected),
            accepting: AtomicBool::new(true),
            pending_disconnect: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
            client_peer: Mutex::new(None),
            connecting_placeholder: Mutex::new(None),
            pending_reliable: Mutex::new(VecDeque::new()),
            on_message: Mutex::new(Event::new()),
            on_connect: Mutex::new(Event::new()),
            on_disconnect: Mutex::new(Event::new()),
            on_timeout: Mutex::new(Event::new()),
            bytes_in: Mutex::new(Measurement::default()),
            bytes_out: Mutex::new(Measurement::default()),
            packets_in: Mutex::new(Measurement::default()),
            packets_out: Mutex::new(Measurement::default()),
            messages_in: Mutex::new(Measurement::default()),
            messages_out: Mutex::new(Measurement::default()),
        })
    }

    pub fn state(&self) -> EndpointState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state(), EndpointState::Disconnected)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Register user message types (spec.md §4.4).
    pub fn add_message_types(
        &self,
        descriptors: impl IntoIterator<Item = MessageDescriptor>,
    ) -> Result<(), ConfigError> {
        self.registry.lock().add(descriptors)
    }

    /// Build a fresh, default-valued instance of a registered message type
    /// to populate and hand to [`Endpoint::send`].
    pub fn instantiate(&self, name: &str) -> Result<Message, ConfigError> {
        self.registry.lock().instantiate(name)
    }

    pub fn instantiate_by_id(&self, id: i32) -> Result<Message, ConfigError> {
        self.registry.lock().instantiate_by_id(id)
    }

    pub fn on_message(&self, handler: impl Fn(&(Message, Arc<Peer>)) + Send + Sync + 'static) {
        self.on_message.lock().attach(handler);
    }

    pub fn on_connect(&self, handler: impl Fn(&Arc<Peer>) + Send + Sync + 'static) {
        self.on_connect.lock().attach(handler);
    }

    pub fn on_disconnect(&self, handler: impl Fn(&Option<Arc<Peer>>) + Send + Sync + 'static) {
        self.on_disconnect.lock().attach(handler);
    }

    pub fn on_timeout(&self, handler: impl Fn(&Arc<Peer>) + Send + Sync + 'static) {
        self.on_timeout.lock().attach(handler);
    }

    pub fn bytes_in_rate(&self) -> f64 {
        self.bytes_in.lock().average()
    }

    pub fn bytes_out_rate(&self) -> f64 {
        self.bytes_out.lock().average()
    }

    pub fn messages_in_rate(&self) -> f64 {
        self.messages_in.lock().average()
    }

    pub fn messages_out_rate(&self) -> f64 {
        self.messages_out.lock().average()
    }

    /// Spawn the background reader thread. The endpoint must already be
    /// bound or connected.
    pub fn start(self: &Arc<Self>) -> Result<(), ConfigError> {
        if matches!(self.state(), EndpointState::Disconnected) {
            return Err(ConfigError::NotStarted("start"));
        }
        let reader = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("transmit-reader".into())
            .spawn(move || reader.reader_loop())
            .expect("failed to spawn reader thread");
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    fn reader_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; self.config.mtu as usize];
        loop {
            if self.closed.load(Ordering::SeqCst) {
                debug!("reader context stopping, endpoint closed");
                return;
            }
            match self.socket.recv_from(&mut buf) {
                Ok((n, addr)) => {
                    self.bytes_in.lock().add(n as u64);
                    self.packets_in.lock().add(1);
                    self.handle_datagram(&buf[..n], addr);
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    warn!("reader context exiting after socket error: {e}");
                    return;
                }
            }
        }
    }

    /// Decode every frame packed into one datagram (spec.md §4.2/§4.3). A
    /// malformed frame abandons the rest of the datagram but never the
    /// reader loop itself.
    fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let Some(peer) = self.peer_for_addr(addr) else {
            debug!("dropping datagram from unrecognized {addr}: not accepting new peers");
            return;
        };
        let mut buf = ByteBuffer::from_bytes(Bytes::copy_from_slice(data));
        while !buf.is_empty() {
            self.messages_in.lock().add(1);
            let seq = match buf.read_u64() {
                Ok(v) => v,
                Err(e) => {
                    warn!("abandoning datagram from {addr}: {e}");
                    return;
                }
            };
            let flags = match buf.read_u8() {
                Ok(v) => BitField::from(v),
                Err(e) => {
                    warn!("abandoning datagram from {addr}: {e}");
                    return;
                }
            };
            let msg = match self.registry.lock().decode(&mut buf) {
                Ok(m) => m,
                Err(e) => {
                    warn!("abandoning datagram from {addr}: {e}");
                    return;
                }
            };
            let tmsg =
                TransportMessage::new(msg, seq).with_flags(Some(flags.get(0)), Some(flags.get(1)));
            self.dispatch_incoming(tmsg, &peer);
        }
    }

    fn peer_for_addr(&self, addr: SocketAddr) -> Option<Arc<Peer>> {
        if let Some(existing) = self.peers.lock().values().find(|p| p.addr() == addr) {
            return Some(Arc::clone(existing));
        }
        if self.accepting.load(Ordering::SeqCst) {
            Some(self.new_peer(addr))
        } else {
            None
        }
    }

    fn new_peer(&self, addr: SocketAddr) -> Arc<Peer> {
        let id = self.next_peer_id.fetch_add(1, Ordering::SeqCst) + 1;
        let peer = Arc::new(Peer::new(
            id,
            addr,
            Arc::clone(&self.seq_counter),
            self.config.duplicate_window,
            self.config.ping_samples,
        ));
        self.peers.lock().insert(id, Arc::clone(&peer));
        peer
    }

    fn dispatch_incoming(&self, tmsg: TransportMessage, peer: &Arc<Peer>) {
        let disposition = {
            let registry = self.registry.lock();
            peer.process_incoming(tmsg, &registry)
        };
        match disposition {
            Disposition::Duplicate | Disposition::Suppressed | Disposition::Handled | Disposition::Ignored => {}
            Disposition::UserMessage(msg) => {
                let _ = self.inbox_tx.send(InboxItem::User(msg, Arc::clone(peer)));
            }
            Disposition::PeerDisconnected => {
                let _ = self.inbox_tx.send(InboxItem::Disconnect(Some(Arc::clone(peer))));
            }
            Disposition::Handshake(kind, msg) => self.handle_handshake(kind, msg, peer),
        }
    }

    /// Server- and client-side connection handshake (spec.md §4.6).
    fn handle_handshake(&self, kind: ControlKind, msg: Message, peer: &Arc<Peer>) {
        match kind {
            ControlKind::ConnectRequest if self.is_server => {
                let protocol = match msg.get("protocol") {
                    Some(FieldValue::Int(p)) => *p as i32,
                    _ => -1,
                };
                let registry = self.registry.lock();
                if protocol == self.config.protocol_version {
                    let accepted = registry
                        .instantiate_by_id(control::T_CONNECT_REQUEST_ACCEPTED)
                        .expect("control vocabulary always registered");
                    drop(registry);
                    peer.send_internal(accepted, true, false);
                    let _ = self.inbox_tx.send(InboxItem::Connect(Arc::clone(peer)));
                } else {
                    let rejected = registry
                        .instantiate_by_id(control::T_CONNECT_REQUEST_REJECTED)
                        .expect("control vocabulary always registered");
                    drop(registry);
                    peer.send_internal(rejected, true, false);
                    peer.mark_pending_disconnect();
                }
            }
            ControlKind::ConnectRequestAccepted if !self.is_server => {
                peer.clear_pending_disconnect();
                // The placeholder's own TConnectRequest has served its
                // purpose; drop it so it doesn't keep retransmitting if its
                // ack was lost (spec.md §4.6, §9).
                peer.clear_outgoing();
                *self.state.lock() = EndpointState::Connected;
                self.accepting.store(false, Ordering::SeqCst);
                *self.client_peer.lock() = Some(Arc::clone(peer));
                *self.connecting_placeholder.lock() = None;
                let _ = self.inbox_tx.send(InboxItem::Connect(Arc::clone(peer)));

                let mut pending = self.pending_reliable.lock();
                for tmsg in pending.drain(..) {
                    peer.enqueue_replay(tmsg);
                }
            }
            ControlKind::ConnectRequestRejected if !self.is_server => {
                *self.state.lock() = EndpointState::Disconnected;
                peer.mark_pending_disconnect();
                *self.connecting_placeholder.lock() = None;
                self.pending_reliable.lock().clear();
                let _ = self.inbox_tx.send(InboxItem::Disconnect(None));
            }
            other => {
                warn!("ignoring handshake message {other:?} in the current role/state");
            }
        }
    }

    fn begin_connect(&self, addr: SocketAddr) {
        *self.state.lock() = EndpointState::Connecting;
        let placeholder = self.new_peer(addr);
        let mut request = self
            .registry
            .lock()
            .instantiate_by_id(control::T_CONNECT_REQUEST)
            .expect("control vocabulary always registered");
        request
            .set("protocol", FieldValue::Int(self.config.protocol_version as i64))
            .expect("TConnectRequest always has a protocol field");
        placeholder.send_internal(request, true, false);
        // Retire this placeholder once its one message is acked; the
        // handshake response arrives on this same peer (same remote addr).
        placeholder.mark_pending_disconnect();
        *self.connecting_placeholder.lock() = Some(placeholder);
    }

    /// Queue a message for every connected peer not named in `exclude`
    /// (spec.md §4.6). While CONNECTING or DISCONNECTED, reliable messages
    /// are buffered for replay once the handshake completes; unreliable
    /// ones are dropped silently.
    pub fn send(&self, msg: Message, exclude: &[u64], reliable: Option<bool>, ordered: Option<bool>) {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let tmsg = TransportMessage::new(msg, seq).with_flags(reliable, ordered);
        self.messages_out.lock().add(1);

        match self.state() {
            EndpointState::Connected | EndpointState::Listening => {
                let peers = self.peers.lock();
                for (id, peer) in peers.iter() {
                    if exclude.contains(id) {
                        continue;
                    }
                    peer.try_enqueue_user(tmsg.clone());
                }
            }
            EndpointState::Connecting | EndpointState::Disconnected => {
                if tmsg.reliable() {
                    self.pending_reliable.lock().push_back(tmsg);
                }
            }
        }
    }

    /// Drain the inbox into user events, reap dead peers, tick liveness and
    /// flush outbound packets (spec.md §4.6). Never blocks on the network.
    pub fn update(&self) {
        while let Ok(item) = self.inbox_rx.try_recv() {
            match item {
                InboxItem::User(msg, peer) => self.on_message.lock().fire(&(msg, peer)),
                InboxItem::Connect(peer) => self.on_connect.lock().fire(&peer),
                InboxItem::Disconnect(peer) => self.on_disconnect.lock().fire(&peer),
                InboxItem::Timeout(peer) => self.on_timeout.lock().fire(&peer),
            }
        }

        self.peers
            .lock()
            .retain(|_, p| !(p.is_pending_disconnect() && p.outgoing_is_empty()));

        let peers: Vec<Arc<Peer>> = self.peers.lock().values().cloned().collect();
        {
            let registry = self.registry.lock();
            for peer in &peers {
                let timed_out = peer.tick_liveness(self.config.ping_interval, self.config.timeout, &registry);
                if timed_out {
                    let _ = self.inbox_tx.send(InboxItem::Timeout(Arc::clone(peer)));
                }
            }
        }

        for peer in &peers {
            for datagram in peer.pack_outgoing(self.config.mtu, DEFAULT_RETRANSMIT_COOLDOWN) {
                match self.socket.send_to(&datagram, peer.addr()) {
                    Ok(n) => {
                        self.bytes_out.lock().add(n as u64);
                        self.packets_out.lock().add(1);
                    }
                    Err(e) => warn!("send to {} failed: {e}", peer.addr()),
                }
            }
        }

        if self.pending_disconnect.load(Ordering::SeqCst) && self.peers.lock().is_empty() {
            self.closed.store(true, Ordering::SeqCst);
            *self.state.lock() = EndpointState::Disconnected;
        }
    }

    /// Ask every connected peer to disconnect; the socket is released once
    /// they have all flushed their `TDisconnect` and been reaped.
    pub fn disconnect(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let peers: Vec<Arc<Peer>> = self.peers.lock().values().cloned().collect();
        for peer in &peers {
            let msg = self
                .registry
                .lock()
                .instantiate_by_id(control::T_DISCONNECT)
                .expect("control vocabulary always registered");
            peer.send_internal(msg, false, false);
            peer.mark_pending_disconnect();
            let _ = self.inbox_tx.send(InboxItem::Disconnect(Some(Arc::clone(peer))));
        }
        self.pending_disconnect.store(true, Ordering::SeqCst);
    }
}

/// The server role: binds a local address and accepts any number of peers.
pub struct Server(Arc<Endpoint>);

impl Server {
    pub fn bind(addr: SocketAddr, config: EndpointConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(READER_POLL_INTERVAL))?;
        let endpoint = Endpoint::new(true, socket, config);
        *endpoint.state.lock() = EndpointState::Listening;
        Ok(Self(endpoint))
    }

    pub fn start(&self) -> Result<(), ConfigError> {
        self.0.start()
    }
}

impl Deref for Server {
    type Target = Endpoint;
    fn deref(&self) -> &Endpoint {
        &self.0
    }
}

/// The client role: connects to one remote server and exposes its RTT.
pub struct Client(Arc<Endpoint>);

impl Client {
    pub fn connect(addr: SocketAddr, config: EndpointConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_read_timeout(Some(READER_POLL_INTERVAL))?;
        let endpoint = Endpoint::new(false, socket, config);
        endpoint.begin_connect(addr);
        Ok(Self(endpoint))
    }

    pub fn start(&self) -> Result<(), ConfigError> {
        self.0.start()
    }

    /// The sole peer's RTT average, or `None` before the first pong.
    pub fn latency(&self) -> Option<Duration> {
        self.0.client_peer.lock().as_ref().and_then(|p| p.latency())
    }
}

impl Deref for Client {
    type Target = Endpoint;
    fn deref(&self) -> &Endpoint {
        &self.0
    }
}
