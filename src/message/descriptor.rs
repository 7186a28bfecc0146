use super::{FieldKind, FieldValue};

/// One field of a [`MessageDescriptor`]'s schema: its name, wire type, and
/// default value.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: &'static str,
    pub kind: FieldKind,
    pub default: FieldValue,
}

impl FieldSchema {
    pub fn new(name: &'static str, kind: FieldKind, default: FieldValue) -> Self {
        debug_assert_eq!(
            default.kind(),
            kind,
            "default value for field '{name}' does not match its declared kind"
        );
        Self { name, kind, default }
    }
}

/// Static description of a message type: its wire id, type name, default
/// reliability/ordering, and field schema.
///
/// Field order is normalized to lexicographic-by-name at construction so
/// that encode and decode always walk fields in the same order without
/// either side re-sorting on every access (spec.md §3: "sender and
/// receiver MUST agree").
#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    pub id: i32,
    pub name: String,
    pub reliable: bool,
    pub ordered: bool,
    pub schema: Vec<FieldSchema>,
}

impl MessageDescriptor {
    pub fn new(
        id: i32,
        name: impl Into<String>,
        reliable: bool,
        ordered: bool,
        mut schema: Vec<FieldSchema>,
    ) -> Self {
        schema.sort_by(|a, b| a.name.cmp(b.name));
        Self {
            id,
            name: name.into(),
            reliable,
            ordered,
            schema,
        }
    }
}
