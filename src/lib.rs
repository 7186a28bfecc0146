//! Reliable messaging over connectionless datagram sockets.
//!
//! A peer (client or server) exchanges typed, self-describing [`Message`]s
//! with one or more remotes atop plain UDP. Reliability, ordering,
//! duplicate suppression, heartbeats and packing are all layered on top
//! by [`Peer`] and driven by the user at their own cadence through
//! [`Endpoint::update`].

mod bitfield;
mod byte_buffer;
mod error;
mod event;
mod measurement;
mod peer;
mod ping_sampler;
mod registry;
mod transport_message;

pub mod control;
pub mod endpoint;
pub mod message;

pub use bitfield::BitField;
pub use byte_buffer::ByteBuffer;
pub use endpoint::{Client, Endpoint, EndpointConfig, EndpointState, Server};
pub use error::{CodecError, ConfigError};
pub use event::Event;
pub use measurement::Measurement;
pub use message::{FieldKind, FieldValue, Message, MessageType};
pub use peer::Peer;
pub use ping_sampler::PingSampler;
pub use registry::Registry;
pub use transport_message::TransportMessage;

/// Wire protocol version negotiated during the connect handshake.
pub const PROTOCOL_VERSION: i32 = 1;
