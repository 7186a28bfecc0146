//! Integration tests driving real loopback UDP sockets end to end — no
//! mocked transport (spec.md §8's concrete scenarios S2, S5, S6).

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use transmit_rs::message::{FieldSchema, MessageDescriptor};
use transmit_rs::{Client, EndpointConfig, EndpointState, FieldKind, FieldValue, Server};

fn ephemeral_loopback() -> SocketAddr {
    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), probe.local_addr().unwrap().port())
}

fn chat_message_type() -> MessageDescriptor {
    MessageDescriptor::new(
        100,
        "Chat",
        true,
        false,
        vec![FieldSchema::new("text", FieldKind::Str, FieldValue::Str(String::new()))],
    )
}

/// Drive both endpoints' `update()` until `done` returns true or `timeout`
/// elapses. Mirrors how a host application would pump the engine.
fn pump_until(endpoints: &[&dyn Fn()], mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        for endpoint in endpoints {
            endpoint();
        }
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn bind_connect_and_deliver_reliable_message() {
    let _ = env_logger::try_init();
    let addr = ephemeral_loopback();
    let server = Server::bind(addr, EndpointConfig::default()).unwrap();
    server.start().unwrap();
    server.add_message_types([chat_message_type()]).unwrap();

    let client = Client::connect(addr, EndpointConfig::default()).unwrap();
    client.start().unwrap();
    client.add_message_types([chat_message_type()]).unwrap();

    let delivered = Arc::new(AtomicBool::new(false));
    let delivered_handle = Arc::clone(&delivered);
    server.on_message(move |(msg, _peer)| {
        if msg.get("text") == Some(&FieldValue::Str("hello".to_string())) {
            delivered_handle.store(true, Ordering::SeqCst);
        }
    });

    let tick_server = || server.update();
    let tick_client = || client.update();
    let endpoints: [&dyn Fn(); 2] = [&tick_server, &tick_client];

    let mut sent = false;
    let ok = pump_until(
        &endpoints,
        || {
            if !sent && client.state() == EndpointState::Connected {
                let mut msg = client.instantiate("Chat").unwrap();
                msg.set("text", FieldValue::Str("hello".to_string())).unwrap();
                client.send(msg, &[], Some(true), None);
                sent = true;
            }
            delivered.load(Ordering::SeqCst)
        },
        Duration::from_secs(2),
    );

    assert!(ok, "server's onMessage did not fire within 2 seconds");
}

#[test]
fn protocol_mismatch_is_rejected_and_client_disconnects() {
    let _ = env_logger::try_init();
    let addr = ephemeral_loopback();
    let server = Server::bind(addr, EndpointConfig::default()).unwrap();
    server.start().unwrap();

    // Construct the client with the server's protocol version, then hand
    // it a newer one to force the mismatch the real handshake would reject.
    let client = Client::connect(addr, EndpointConfig::default().with_protocol_version(9)).unwrap();
    client.start().unwrap();

    let disconnected = Arc::new(AtomicBool::new(false));
    let disconnected_handle = Arc::clone(&disconnected);
    client.on_disconnect(move |peer| {
        assert!(peer.is_none(), "a rejected handshake carries no live peer");
        disconnected_handle.store(true, Ordering::SeqCst);
    });

    let tick_server = || server.update();
    let tick_client = || client.update();
    let endpoints: [&dyn Fn(); 2] = [&tick_server, &tick_client];

    let ok = pump_until(
        &endpoints,
        || disconnected.load(Ordering::SeqCst),
        Duration::from_secs(2),
    );

    assert!(ok, "client never observed the rejected handshake");
    assert_eq!(client.state(), EndpointState::Disconnected);
}

#[test]
fn timed_out_peer_is_reaped_after_the_next_update() {
    let _ = env_logger::try_init();
    let addr = ephemeral_loopback();
    let config = EndpointConfig::default()
        .with_timeout(Duration::from_millis(150))
        .with_ping_interval(Duration::from_secs(60));
    let server = Server::bind(addr, config).unwrap();
    server.start().unwrap();

    let timed_out = Arc::new(AtomicUsize::new(0));
    let timed_out_handle = Arc::clone(&timed_out);
    server.on_timeout(move |_peer| {
        timed_out_handle.fetch_add(1, Ordering::SeqCst);
    });

    // A bare socket stands in for a client that completes the handshake
    // once, then goes silent — the server's only view of a "timed out peer".
    let phantom = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    phantom.connect(addr).unwrap();
    phantom.send(&connect_request_frame(1)).unwrap();

    let deadline = Instant::now() + Duration::from_millis(400);
    while Instant::now() < deadline {
        server.update();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(timed_out.load(Ordering::SeqCst), 1, "onTimeout should fire exactly once");

    // One more update() reaps the now pending-disconnect, empty-queue peer.
    server.update();
    assert_eq!(server.peer_count(), 0);
}

/// Hand-encode a `TConnectRequest(protocol)` frame (spec.md §6) to drive the
/// handshake from a socket that isn't a full [`Client`].
fn connect_request_frame(protocol: i32) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&0u64.to_be_bytes()); // sequenceNumber
    frame.push(0b01); // reliable, not ordered
    frame.extend_from_slice(&(-3i32).to_be_bytes()); // TConnectRequest
    frame.extend_from_slice(&(protocol as i64).to_be_bytes()); // protocol field
    frame
}
