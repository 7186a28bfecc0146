use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info};

use crate::byte_buffer::ByteBuffer;
use crate::control;
use crate::error::{CodecError, ConfigError};
use crate::message::{Message, MessageDescriptor};

/// Bidirectional mapping `{wire id <-> type name <-> descriptor}`.
///
/// The control vocabulary (§6) is pre-installed by [`Registry::new`]. IDs
/// and type names are each globally unique; [`Registry::add`] rejects a
/// registration whose id collides without its name also colliding (or vice
/// versa) as a configuration error, matching the Python source's XOR check.
pub struct Registry {
    by_id: HashMap<i32, Arc<MessageDescriptor>>,
    by_name: HashMap<String, Arc<MessageDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        };
        for descriptor in control::vocabulary() {
            registry
                .add_descriptor(descriptor)
                .expect("control vocabulary must not collide with itself");
        }
        registry
    }

    /// Register one or more user message descriptors.
    pub fn add(&mut self, descriptors: impl IntoIterator<Item = MessageDescriptor>) -> Result<(), ConfigError> {
        for descriptor in descriptors {
            self.add_descriptor(descriptor)?;
        }
        Ok(())
    }

    fn add_descriptor(&mut self, descriptor: MessageDescriptor) -> Result<(), ConfigError> {
        if descriptor.id == 0 || (descriptor.id < 0 && !(-9..=-1).contains(&descriptor.id)) {
            return Err(ConfigError::ReservedMessageId(descriptor.id));
        }
        let id_taken = self.by_id.contains_key(&descriptor.id);
        let name_taken = self.by_name.contains_key(&descriptor.name);
        if id_taken != name_taken {
            error!(
                "registry collision for id {} / name '{}': id_taken={id_taken}, name_taken={name_taken}",
                descriptor.id, descriptor.name
            );
            return Err(ConfigError::DuplicateRegistration {
                id: descriptor.id,
                name: descriptor.name.clone(),
            });
        }
        if id_taken {
            // both collide identically: nothing to do, but not an error per
            // se for re-adding the exact same control vocabulary entry.
            return Ok(());
        }
        info!(
            "registered message type '{}' with id {}",
            descriptor.name, descriptor.id
        );
        let descriptor = Arc::new(descriptor);
        self.by_id.insert(descriptor.id, Arc::clone(&descriptor));
        self.by_name.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn get_by_id(&self, id: i32) -> Result<Arc<MessageDescriptor>, ConfigError> {
        self.by_id
            .get(&id)
            .cloned()
            .ok_or(ConfigError::UnknownMessageId(id))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<MessageDescriptor>, ConfigError> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownMessageName(name.to_string()))
    }

    pub fn is_a(&self, message: &Message, name: &str) -> bool {
        message.is_a(name)
    }

    /// Construct a fresh instance of a registered type, fields at default.
    pub fn instantiate(&self, name: &str) -> Result<Message, ConfigError> {
        Ok(Message::from_descriptor(self.get_by_name(name)?))
    }

    pub fn instantiate_by_id(&self, id: i32) -> Result<Message, ConfigError> {
        Ok(Message::from_descriptor(self.get_by_id(id)?))
    }

    /// Decode one message from the front of `buf`: reads `msgID`, resolves
    /// the descriptor, then reads fields in sorted order (spec.md §4.2).
    /// A registry miss or a malformed field is fatal to this message only;
    /// the caller is responsible for abandoning the rest of the datagram.
    pub fn decode(&self, buf: &mut ByteBuffer) -> Result<Message, CodecError> {
        let msg_id = buf.read_i32()?;
        let descriptor = self
            .by_id
            .get(&msg_id)
            .cloned()
            .ok_or(CodecError::UnknownMessageId(msg_id))?;
        Message::decode_body(descriptor, buf)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{FieldKind, FieldSchema, FieldValue};

    #[test]
    fn control_vocabulary_is_preinstalled() {
        let registry = Registry::new();
        assert!(registry.get_by_name("TConnect").is_ok());
        assert!(registry.get_by_id(-9).is_ok()); // TTimeout
    }

    #[test]
    fn zero_id_is_rejected() {
        let mut registry = Registry::new();
        let descriptor = MessageDescriptor::new(0, "Bad", false, false, vec![]);
        assert!(matches!(
            registry.add([descriptor]),
            Err(ConfigError::ReservedMessageId(0))
        ));
    }

    #[test]
    fn negative_id_outside_control_vocabulary_is_rejected() {
        let mut registry = Registry::new();
        let descriptor = MessageDescriptor::new(-50, "Bad", false, false, vec![]);
        assert!(matches!(
            registry.add([descriptor]),
            Err(ConfigError::ReservedMessageId(-50))
        ));
    }

    #[test]
    fn duplicate_id_different_name_is_rejected() {
        let mut registry = Registry::new();
        registry
            .add([MessageDescriptor::new(1, "First", false, false, vec![])])
            .unwrap();
        let err = registry
            .add([MessageDescriptor::new(1, "Second", false, false, vec![])])
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRegistration { .. }));
    }

    #[test]
    fn decode_unknown_id_is_fatal_to_the_message_only() {
        let registry = Registry::new();
        let mut buf = ByteBuffer::new();
        buf.append(&999i32.to_be_bytes());
        assert!(matches!(
            registry.decode(&mut buf),
            Err(CodecError::UnknownMessageId(999))
        ));
    }

    #[test]
    fn roundtrip_through_registry() {
        let mut registry = Registry::new();
        registry
            .add([MessageDescriptor::new(
                7,
                "Ping",
                false,
                false,
                vec![FieldSchema::new("n", FieldKind::Int, FieldValue::Int(0))],
            )])
            .unwrap();
        let mut msg = registry.instantiate("Ping").unwrap();
        msg.set("n", FieldValue::Int(42)).unwrap();

        let bytes = msg.to_bytes();
        let mut buf = ByteBuffer::new();
        buf.append(&bytes);
        let decoded = registry.decode(&mut buf).unwrap();
        assert_eq!(decoded.get("n"), Some(&FieldValue::Int(42)));
    }
}
