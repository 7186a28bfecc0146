//! The reserved negative-id control vocabulary (spec.md §6).
//!
//! The Python source tags control messages by overloading `==` against a
//! class name string. That is a coarse type-tag query dressed up as
//! reflection; here it is replaced with an explicit [`ControlKind`] enum
//! recovered from a message's id, per spec.md's Design Notes.

use crate::message::{FieldKind, FieldSchema, FieldValue, Message, MessageDescriptor};

pub const T_CONNECT: i32 = -1;
pub const T_DISCONNECT: i32 = -2;
pub const T_CONNECT_REQUEST: i32 = -3;
pub const T_CONNECT_REQUEST_ACCEPTED: i32 = -4;
pub const T_CONNECT_REQUEST_REJECTED: i32 = -5;
pub const T_ACKNOWLEDGEMENT: i32 = -6;
pub const T_PING: i32 = -7;
pub const T_PONG: i32 = -8;
pub const T_TIMEOUT: i32 = -9;

/// An explicit tag for a decoded control message, recovered from its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Connect,
    Disconnect,
    ConnectRequest,
    ConnectRequestAccepted,
    ConnectRequestRejected,
    Acknowledgement,
    Ping,
    Pong,
    Timeout,
}

pub fn kind_of(message: &Message) -> Option<ControlKind> {
    Some(match message.msg_id() {
        T_CONNECT => ControlKind::Connect,
        T_DISCONNECT => ControlKind::Disconnect,
        T_CONNECT_REQUEST => ControlKind::ConnectRequest,
        T_CONNECT_REQUEST_ACCEPTED => ControlKind::ConnectRequestAccepted,
        T_CONNECT_REQUEST_REJECTED => ControlKind::ConnectRequestRejected,
        T_ACKNOWLEDGEMENT => ControlKind::Acknowledgement,
        T_PING => ControlKind::Ping,
        T_PONG => ControlKind::Pong,
        T_TIMEOUT => ControlKind::Timeout,
        _ => return None,
    })
}

/// The nine descriptors pre-installed into every [`crate::Registry`].
pub fn vocabulary() -> Vec<MessageDescriptor> {
    vec![
        MessageDescriptor::new(T_CONNECT, "TConnect", false, false, vec![]),
        MessageDescriptor::new(T_DISCONNECT, "TDisconnect", false, false, vec![]),
        MessageDescriptor::new(
            T_CONNECT_REQUEST,
            "TConnectRequest",
            true,
            false,
            vec![FieldSchema::new(
                "protocol",
                FieldKind::Int,
                FieldValue::Int(0),
            )],
        ),
        MessageDescriptor::new(
            T_CONNECT_REQUEST_ACCEPTED,
            "TConnectRequestAccepted",
            true,
            false,
            vec![],
        ),
        MessageDescriptor::new(
            T_CONNECT_REQUEST_REJECTED,
            "TConnectRequestRejected",
            true,
            false,
            vec![],
        ),
        MessageDescriptor::new(
            T_ACKNOWLEDGEMENT,
            "TAcknowledgement",
            false,
            false,
            vec![FieldSchema::new(
                "sequenceNumber",
                FieldKind::Int,
                FieldValue::Int(0),
            )],
        ),
        MessageDescriptor::new(
            T_PING,
            "TPing",
            false,
            false,
            vec![FieldSchema::new(
                "pingNumber",
                FieldKind::Int,
                FieldValue::Int(0),
            )],
        ),
        MessageDescriptor::new(
            T_PONG,
            "TPong",
            false,
            false,
            vec![FieldSchema::new(
                "pingNumber",
                FieldKind::Int,
                FieldValue::Int(0),
            )],
        ),
        MessageDescriptor::new(T_TIMEOUT, "TTimeout", false, false, vec![]),
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Registry;

    #[test]
    fn kind_of_recognizes_every_control_message() {
        let registry = Registry::new();
        for (id, expected) in [
            (T_CONNECT, ControlKind::Connect),
            (T_DISCONNECT, ControlKind::Disconnect),
            (T_TIMEOUT, ControlKind::Timeout),
        ] {
            let msg = registry.instantiate_by_id(id).unwrap();
            assert_eq!(kind_of(&msg), Some(expected));
        }
    }

    #[test]
    fn user_messages_have_no_control_kind() {
        let registry = Registry::new();
        // TAcknowledgement's sibling ids are all negative; a positive id
        // (user space) never maps to a ControlKind.
        let msg = registry.instantiate_by_id(T_PING).unwrap();
        assert!(kind_of(&msg).is_some());
        let mut descriptor_free = msg.clone();
        descriptor_free.set("pingNumber", FieldValue::Int(5)).unwrap();
        assert_eq!(kind_of(&descriptor_free), Some(ControlKind::Ping));
    }
}
