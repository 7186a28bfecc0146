//! Typed, self-describing messages with a stable on-wire layout.
//!
//! Rather than modelling each user message as its own Rust type (the
//! Python source uses per-class attribute dictionaries and reflection —
//! a domain data description, not a language feature worth imitating
//! directly), every message is a value of the single [`Message`] type,
//! driven by a [`MessageDescriptor`] that declares its schema. User-defined
//! message types are descriptors registered at runtime through
//! [`crate::Registry::add`], not subclasses.

mod descriptor;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

pub use descriptor::{FieldSchema, MessageDescriptor};

use crate::byte_buffer::ByteBuffer;
use crate::error::{CodecError, ConfigError};

/// The primitive wire types a [`Message`] field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
}

impl FieldKind {
    const fn name(self) -> &'static str {
        match self {
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Str => "str",
            FieldKind::Bytes => "bytes",
        }
    }
}

/// A concrete field value, tagged with its [`FieldKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Bytes),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Str(_) => FieldKind::Str,
            FieldValue::Bytes(_) => FieldKind::Bytes,
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            FieldValue::Int(v) => buf.put_i64(*v),
            FieldValue::Float(v) => buf.put_f64(*v),
            FieldValue::Bool(v) => buf.put_u8(u8::from(*v)),
            FieldValue::Str(v) => {
                let bytes = v.as_bytes();
                buf.put_i64(bytes.len() as i64);
                buf.put_slice(bytes);
            }
            FieldValue::Bytes(v) => {
                buf.put_i64(v.len() as i64);
                buf.put_slice(v);
            }
        }
    }

    fn decode(kind: FieldKind, buf: &mut ByteBuffer) -> Result<Self, CodecError> {
        Ok(match kind {
            FieldKind::Int => FieldValue::Int(buf.read_i64()?),
            FieldKind::Float => FieldValue::Float(buf.read_f64()?),
            FieldKind::Bool => FieldValue::Bool(buf.read_bool()?),
            FieldKind::Str => {
                let len = buf.read_i64()? as usize;
                let raw = buf.read(len)?;
                FieldValue::Str(String::from_utf8(raw.to_vec())?)
            }
            FieldKind::Bytes => {
                let len = buf.read_i64()? as usize;
                FieldValue::Bytes(buf.read(len)?)
            }
        })
    }
}

/// Alias kept for readability at call sites: the same type backs the
/// registry's notion of "factory" (a descriptor can stamp out empty
/// instances of the message it describes).
pub type MessageType = MessageDescriptor;

/// A typed record carried over the transport.
///
/// Fields are always observed and encoded in lexicographic order of their
/// names — a `BTreeMap` gives us that for free, rather than a sorted `Vec`
/// scan on every access as the Python source does.
#[derive(Clone)]
pub struct Message {
    descriptor: Arc<MessageDescriptor>,
    fields: BTreeMap<&'static str, FieldValue>,
    cache: Arc<Mutex<Option<Bytes>>>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.descriptor.id)
            .field("name", &self.descriptor.name)
            .field("fields", &self.fields)
            .finish()
    }
}

impl Message {
    pub(crate) fn from_descriptor(descriptor: Arc<MessageDescriptor>) -> Self {
        let fields = descriptor
            .schema
            .iter()
            .map(|f| (f.name, f.default.clone()))
            .collect();
        Self {
            descriptor,
            fields,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    pub fn msg_id(&self) -> i32 {
        self.descriptor.id
    }

    pub fn type_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_a(&self, name: &str) -> bool {
        self.descriptor.name == name
    }

    pub fn default_reliable(&self) -> bool {
        self.descriptor.reliable
    }

    pub fn default_ordered(&self) -> bool {
        self.descriptor.ordered
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Mutate a field by name. Invalidates the serialization cache.
    pub fn set(&mut self, field: &'static str, value: FieldValue) -> Result<(), ConfigError> {
        match self.fields.get_mut(field) {
            Some(slot) => {
                if slot.kind() != value.kind() {
                    return Err(ConfigError::FieldTypeMismatch {
                        field,
                        expected: slot.kind().name(),
                        actual: value.kind().name(),
                    });
                }
                *slot = value;
                *self.cache.lock() = None;
                Ok(())
            }
            None => Err(ConfigError::UnknownField(field)),
        }
    }

    /// Serialize `msgID || fields...` (the "encoded Message" portion of a
    /// wire frame), using and refreshing the lazy cache described in
    /// spec.md §4.2.
    pub fn to_bytes(&self) -> Bytes {
        if let Some(cached) = self.cache.lock().as_ref() {
            return cached.clone();
        }
        let mut buf = BytesMut::with_capacity(4 + self.fields.len() * 8);
        buf.put_i32(self.descriptor.id);
        for value in self.fields.values() {
            value.encode_into(&mut buf);
        }
        let bytes = buf.freeze();
        *self.cache.lock() = Some(bytes.clone());
        bytes
    }

    /// Decode the field section of a message whose id has already been read
    /// and resolved to `descriptor` by the registry.
    pub(crate) fn decode_body(
        descriptor: Arc<MessageDescriptor>,
        buf: &mut ByteBuffer,
    ) -> Result<Self, CodecError> {
        let mut fields = BTreeMap::new();
        for field in descriptor.schema.iter() {
            fields.insert(field.name, FieldValue::decode(field.kind, buf)?);
        }
        Ok(Self {
            descriptor,
            fields,
            cache: Arc::new(Mutex::new(None)),
        })
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.id == other.descriptor.id && self.fields == other.fields
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_descriptor() -> Arc<MessageDescriptor> {
        Arc::new(MessageDescriptor::new(
            1,
            "TestMessage",
            false,
            false,
            vec![
                FieldSchema::new("a", FieldKind::Str, FieldValue::Str("Test String abc".into())),
                FieldSchema::new(
                    "b",
                    FieldKind::Bytes,
                    FieldValue::Bytes(Bytes::from_static(b"Binary Data")),
                ),
                FieldSchema::new("c", FieldKind::Int, FieldValue::Int(1234567890)),
                FieldSchema::new(
                    "d",
                    FieldKind::Float,
                    FieldValue::Float(3.14159265358979323846),
                ),
            ],
        ))
    }

    // S1 from spec.md §8: a fixed encoding fixture.
    #[test]
    fn encode_fixture_matches_spec() {
        let msg = Message::from_descriptor(test_descriptor());
        let bytes = msg.to_bytes();

        let mut expected = BytesMut::new();
        expected.put_i32(1); // msgID
        expected.put_i64(15);
        expected.put_slice(b"Test String abc");
        expected.put_i64(11);
        expected.put_slice(b"Binary Data");
        expected.put_i64(1234567890);
        expected.put_f64(3.14159265358979323846);

        assert_eq!(bytes, expected.freeze());
    }

    #[test]
    fn decode_is_inverse_of_encode() {
        let msg = Message::from_descriptor(test_descriptor());
        let bytes = msg.to_bytes();

        let mut buf = ByteBuffer::new();
        buf.append(&bytes[4..]); // skip msgID, already "read" by registry in real use
        let decoded = Message::decode_body(test_descriptor(), &mut buf).unwrap();

        assert_eq!(msg, decoded);
    }

    #[test]
    fn set_rejects_wrong_kind() {
        let mut msg = Message::from_descriptor(test_descriptor());
        let err = msg.set("c", FieldValue::Bool(true)).unwrap_err();
        assert!(matches!(err, ConfigError::FieldTypeMismatch { .. }));
    }

    #[test]
    fn cache_is_invalidated_on_mutation() {
        let mut msg = Message::from_descriptor(test_descriptor());
        let first = msg.to_bytes();
        msg.set("c", FieldValue::Int(42)).unwrap();
        let second = msg.to_bytes();
        assert_ne!(first, second);
    }
}
