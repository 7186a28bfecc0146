use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use log::warn;
use parking_lot::Mutex;

use crate::control::{self, ControlKind};
use crate::message::{FieldValue, Message};
use crate::ping_sampler::PingSampler;
use crate::registry::Registry;
use crate::transport_message::TransportMessage;

/// A bounded FIFO of recently seen sequence numbers (spec.md §3: capped at
/// 1000 entries, oldest evicted first).
struct SeenWindow {
    order: VecDeque<u64>,
    set: HashSet<u64>,
    capacity: usize,
}

impl SeenWindow {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, seq: u64) -> bool {
        self.set.contains(&seq)
    }

    fn insert(&mut self, seq: u64) {
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.order.push_back(seq);
        self.set.insert(seq);
    }
}

/// What [`Peer::process_incoming`] determined a frame required. The
/// [`crate::Endpoint`] that owns this peer acts on these — connection
/// handshake messages are explicitly delegated, per spec.md §4.5.
pub enum Disposition {
    /// Already seen; the ack (if reliable) was already re-queued.
    Duplicate,
    /// An ordered frame older than the highest seen; discarded.
    Suppressed,
    /// Handled entirely within the peer (ack retirement, ping/pong).
    Handled,
    /// A connect handshake message the endpoint must act on.
    Handshake(ControlKind, Message),
    /// The remote asked to disconnect; the peer is now pending teardown.
    PeerDisconnected,
    /// Any other negative-id control message: ignored silently.
    Ignored,
    /// A user message (non-negative id) ready for the endpoint's inbox.
    UserMessage(Message),
}

/// Per-remote reliability, ordering, ping and timeout state.
///
/// Identified by a local id and the remote's datagram address. See
/// spec.md §3 and §4.5 for the full state-machine description.
pub struct Peer {
    id: u64,
    addr: SocketAddr,
    seq_counter: Arc<AtomicU64>,
    outgoing: Mutex<VecDeque<TransportMessage>>,
    seen: Mutex<SeenWindow>,
    last_incoming_ordered_seq: AtomicU64,
    ping_sampler: Mutex<PingSampler>,
    last_ping_time: Mutex<Option<Instant>>,
    last_ping_number: AtomicU64,
    last_inbound_time: Mutex<Option<Instant>>,
    pending_disconnect: AtomicBool,
}

impl Peer {
    pub fn new(
        id: u64,
        addr: SocketAddr,
        seq_counter: Arc<AtomicU64>,
        duplicate_window: usize,
        ping_samples: usize,
    ) -> Self {
        Self {
            id,
            addr,
            seq_counter,
            outgoing: Mutex::new(VecDeque::new()),
            seen: Mutex::new(SeenWindow::new(duplicate_window)),
            last_incoming_ordered_seq: AtomicU64::new(0),
            ping_sampler: Mutex::new(PingSampler::new(ping_samples)),
            last_ping_time: Mutex::new(None),
            last_ping_number: AtomicU64::new(0),
            last_inbound_time: Mutex::new(None),
            pending_disconnect: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn latency(&self) -> Option<Duration> {
        self.ping_sampler.lock().average()
    }

    pub fn is_pending_disconnect(&self) -> bool {
        self.pending_disconnect.load(Ordering::SeqCst)
    }

    pub fn outgoing_is_empty(&self) -> bool {
        self.outgoing.lock().is_empty()
    }

    fn next_seq(&self) -> u64 {
        self.seq_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn enqueue_internal(&self, tmsg: TransportMessage) {
        self.outgoing.lock().push_back(tmsg);
    }

    /// Allocate a sequence number and enqueue a reply/control message that
    /// bypasses the pending-disconnect gate (acks, pings, pongs, and the
    /// handshake replies the endpoint sends on a peer's behalf).
    pub(crate) fn send_internal(&self, msg: Message, reliable: bool, ordered: bool) {
        let seq = self.next_seq();
        let tmsg = TransportMessage::new(msg, seq).with_flags(Some(reliable), Some(ordered));
        self.enqueue_internal(tmsg);
    }

    /// Enqueue a user-initiated message. Refused once this peer is pending
    /// disconnect (spec.md §3: "no new user messages are accepted onto the
    /// outgoing queue").
    pub fn try_enqueue_user(&self, tmsg: TransportMessage) -> bool {
        if self.is_pending_disconnect() {
            return false;
        }
        self.enqueue_internal(tmsg);
        true
    }

    /// Re-enqueue a message buffered while CONNECTING, once the handshake
    /// has completed and this peer is live (spec.md §4.6). Bypasses the
    /// pending-disconnect gate since the peer is known live here.
    pub(crate) fn enqueue_replay(&self, tmsg: TransportMessage) {
        self.enqueue_internal(tmsg);
    }

    /// Stop accepting new user sends. Whatever is already queued (e.g. a
    /// connect request awaiting its ack) is left to flush normally — used
    /// for the CONNECTING placeholder peer and a rejected handshake
    /// (spec.md §4.6).
    pub fn mark_pending_disconnect(&self) {
        self.pending_disconnect.store(true, Ordering::SeqCst);
    }

    /// As [`Self::mark_pending_disconnect`], but also discards whatever is
    /// still queued — used when the remote is known gone (received
    /// `TDisconnect`, or timed out; spec.md §4.5).
    pub fn disconnect_and_clear(&self) {
        self.pending_disconnect.store(true, Ordering::SeqCst);
        self.outgoing.lock().clear();
    }

    /// Resume accepting user sends — used when a CONNECTING placeholder
    /// peer's handshake succeeds and it becomes the live peer (spec.md
    /// §4.6, §9: the placeholder's `mark_pending_disconnect` from
    /// `connect()` must be undone once the accept arrives).
    pub(crate) fn clear_pending_disconnect(&self) {
        self.pending_disconnect.store(false, Ordering::SeqCst);
    }

    /// Drop whatever is still queued, without touching `pendingDisconnect`
    /// (distinct from [`Self::disconnect_and_clear`], which also marks the
    /// peer pending-disconnect). Used on the CONNECTING→CONNECTED
    /// transition to discard the placeholder's residual `TConnectRequest`
    /// once it has served its purpose (spec.md §4.6, §9: "clear any
    /// residual outgoing messages on the temporary placeholder").
    pub(crate) fn clear_outgoing(&self) {
        self.outgoing.lock().clear();
    }

    /// Step 1-6 of spec.md §4.5's inbound processing order.
    pub fn process_incoming(&self, tmsg: TransportMessage, registry: &Registry) -> Disposition {
        *self.last_inbound_time.lock() = Some(Instant::now());

        let seq = tmsg.sequence_number();
        if tmsg.reliable() {
            let mut ack = registry
                .instantiate_by_id(control::T_ACKNOWLEDGEMENT)
                .expect("control vocabulary always registered");
            ack.set("sequenceNumber", FieldValue::Int(seq as i64))
                .expect("TAcknowledgement always has a sequenceNumber field");
            self.send_internal(ack, false, false);
        }

        {
            let mut seen = self.seen.lock();
            if seen.contains(seq) {
                return Disposition::Duplicate;
            }
            seen.insert(seq);
        }

        if tmsg.ordered() && seq < self.last_incoming_ordered_seq.load(Ordering::SeqCst) {
            return Disposition::Suppressed;
        }
        self.last_incoming_ordered_seq.fetch_max(seq, Ordering::SeqCst);

        let msg = tmsg.message();
        match control::kind_of(msg) {
            Some(ControlKind::Acknowledgement) => {
                let Some(FieldValue::Int(acked)) = msg.get("sequenceNumber") else {
                    return Disposition::Handled;
                };
                let acked = *acked as u64;
                let mut outgoing = self.outgoing.lock();
                if let Some(pos) = outgoing.iter().position(|t| t.sequence_number() == acked) {
                    outgoing.remove(pos);
                } else {
                    warn!(
                        "peer {} acked unknown sequence number {acked}, ignoring",
                        self.id
                    );
                }
                Disposition::Handled
            }
            Some(
                kind @ (ControlKind::ConnectRequest
                | ControlKind::ConnectRequestAccepted
                | ControlKind::ConnectRequestRejected),
            ) => Disposition::Handshake(kind, msg.clone()),
            Some(ControlKind::Ping) => {
                let Some(FieldValue::Int(n)) = msg.get("pingNumber") else {
                    return Disposition::Handled;
                };
                let mut pong = registry
                    .instantiate_by_id(control::T_PONG)
                    .expect("control vocabulary always registered");
                pong.set("pingNumber", FieldValue::Int(*n)).unwrap();
                self.send_internal(pong, false, false);
                Disposition::Handled
            }
            Some(ControlKind::Pong) => {
                if let Some(FieldValue::Int(n)) = msg.get("pingNumber") {
                    if *n == self.last_ping_number.load(Ordering::SeqCst) as i64 {
                        if let Some(sent_at) = *self.last_ping_time.lock() {
                            self.ping_sampler.lock().push(sent_at.elapsed());
                        }
                    }
                }
                Disposition::Handled
            }
            Some(ControlKind::Disconnect) => {
                self.disconnect_and_clear();
                Disposition::PeerDisconnected
            }
            Some(ControlKind::Connect) | Some(ControlKind::Timeout) => Disposition::Ignored,
            None if msg.msg_id() >= 0 => Disposition::UserMessage(msg.clone()),
            None => Disposition::Ignored,
        }
    }

    /// Per-tick liveness (spec.md §4.5): send a heartbeat if due, arm or
    /// check the inbound timeout. Returns `true` if this tick just declared
    /// the peer dead.
    pub fn tick_liveness(
        &self,
        ping_interval: Duration,
        timeout: Duration,
        registry: &Registry,
    ) -> bool {
        if !self.is_pending_disconnect() {
            let mut last_ping_time = self.last_ping_time.lock();
            let due = last_ping_time.map_or(true, |t| t.elapsed() >= ping_interval);
            if due {
                let n = self.last_ping_number.fetch_add(1, Ordering::SeqCst) + 1;
                *last_ping_time = Some(Instant::now());
                drop(last_ping_time);
                let mut ping = registry
                    .instantiate_by_id(control::T_PING)
                    .expect("control vocabulary always registered");
                ping.set("pingNumber", FieldValue::Int(n as i64)).unwrap();
                self.send_internal(ping, false, false);
            }
        }

        let mut last_inbound = self.last_inbound_time.lock();
        match *last_inbound {
            None => {
                *last_inbound = Some(Instant::now());
                false
            }
            Some(t) => {
                if t.elapsed() > timeout {
                    drop(last_inbound);
                    self.disconnect_and_clear();
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Outbound packing for one `update()` tick (spec.md §4.5): returns the
    /// datagrams to flush to the socket, none of which exceed `mtu`.
    pub fn pack_outgoing(&self, mtu: u16, default_cooldown: Duration) -> Vec<Bytes> {
        let cooldown = self.ping_sampler.lock().average().unwrap_or(default_cooldown);
        let mtu = mtu as usize;
        let now = Instant::now();

        let mut outgoing = self.outgoing.lock();
        let mut kept = VecDeque::with_capacity(outgoing.len());
        let mut datagrams = Vec::new();
        let mut current = BytesMut::new();

        while let Some(mut tmsg) = outgoing.pop_front() {
            if let Some(last) = tmsg.last_send_attempt() {
                if last.elapsed() < cooldown {
                    kept.push_back(tmsg);
                    continue;
                }
            }
            tmsg.mark_sent(now);
            let bytes = tmsg.to_bytes();
            if bytes.len() > mtu {
                warn!(
                    "peer {} dropping oversized message ({} > mtu {mtu})",
                    self.id,
                    bytes.len()
                );
                continue;
            }
            if current.len() + bytes.len() > mtu && !current.is_empty() {
                datagrams.push(current.split().freeze());
            }
            current.extend_from_slice(&bytes);
            if tmsg.reliable() {
                kept.push_back(tmsg);
            }
        }
        if !current.is_empty() {
            datagrams.push(current.split().freeze());
        }
        *outgoing = kept;
        datagrams
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("pending_disconnect", &self.is_pending_disconnect())
            .finish()
    }
}
