use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};

use crate::bitfield::BitField;
use crate::message::Message;

const RELIABLE_BIT: u8 = 0;
const ORDERED_BIT: u8 = 1;

/// Wraps a [`Message`] with transport-level bookkeeping: its sequence
/// number, reliable/ordered flags, and the scheduler's last send attempt.
///
/// On the wire (spec.md §4.3): `sequenceNumber:u64 || flags:u8 ||
/// <encoded Message>`, with no boundary markers or length prefix — frames
/// pack back-to-back into a datagram.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    msg: Message,
    sequence_number: u64,
    flags: BitField,
    last_send_attempt: Option<Instant>,
}

impl TransportMessage {
    pub fn new(msg: Message, sequence_number: u64) -> Self {
        let reliable = msg.default_reliable();
        let ordered = msg.default_ordered();
        let mut flags = BitField::default();
        flags.set(RELIABLE_BIT, reliable);
        flags.set(ORDERED_BIT, ordered);
        Self {
            msg,
            sequence_number,
            flags,
            last_send_attempt: None,
        }
    }

    pub fn with_flags(mut self, reliable: Option<bool>, ordered: Option<bool>) -> Self {
        if let Some(reliable) = reliable {
            self.set_reliable(reliable);
        }
        if let Some(ordered) = ordered {
            self.set_ordered(ordered);
        }
        self
    }

    pub fn message(&self) -> &Message {
        &self.msg
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn reliable(&self) -> bool {
        self.flags.get(RELIABLE_BIT)
    }

    pub fn set_reliable(&mut self, value: bool) {
        self.flags.set(RELIABLE_BIT, value);
    }

    pub fn ordered(&self) -> bool {
        self.flags.get(ORDERED_BIT)
    }

    pub fn set_ordered(&mut self, value: bool) {
        self.flags.set(ORDERED_BIT, value);
    }

    pub fn last_send_attempt(&self) -> Option<Instant> {
        self.last_send_attempt
    }

    pub fn mark_sent(&mut self, when: Instant) {
        self.last_send_attempt = Some(when);
    }

    /// Serialize the full frame: header plus encoded message.
    pub fn to_bytes(&self) -> Bytes {
        let payload = self.msg.to_bytes();
        let mut buf = BytesMut::with_capacity(9 + payload.len());
        buf.put_u64(self.sequence_number);
        buf.put_u8(self.flags.as_u8());
        buf.put_slice(&payload);
        buf.freeze()
    }

    pub fn byte_len(&self) -> usize {
        9 + self.msg.to_bytes().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Registry;

    #[test]
    fn frame_header_matches_wire_layout() {
        let registry = Registry::new();
        let msg = registry.instantiate("TPing").unwrap();
        let tmsg = TransportMessage::new(msg, 7).with_flags(Some(true), Some(false));

        let bytes = tmsg.to_bytes();
        assert_eq!(&bytes[0..8], &7u64.to_be_bytes());
        assert_eq!(bytes[8], 0b01); // reliable bit set, ordered bit clear
    }

    #[test]
    fn defaults_come_from_the_message_descriptor() {
        let registry = Registry::new();
        let msg = registry.instantiate("TConnectRequest").unwrap(); // reliable by default
        let tmsg = TransportMessage::new(msg, 1);
        assert!(tmsg.reliable());
        assert!(!tmsg.ordered());
    }

    #[test]
    fn byte_len_matches_encoded_length() {
        let registry = Registry::new();
        let msg = registry.instantiate("TAcknowledgement").unwrap();
        let tmsg = TransportMessage::new(msg, 0);
        assert_eq!(tmsg.byte_len(), tmsg.to_bytes().len());
    }
}
