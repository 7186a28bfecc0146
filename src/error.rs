//! Error taxonomy, per spec.md §7: configuration errors are synchronous and
//! fatal to the caller; codec errors are fatal only to the current frame or
//! datagram; transport failures are surfaced as control events rather than
//! thrown (see [`crate::control`] and [`Endpoint`](crate::Endpoint)).

use thiserror::Error;

/// Synchronous, fatal-to-the-caller configuration mistakes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("message id {0} is reserved (0 is invalid, negative ids belong to the control vocabulary)")]
    ReservedMessageId(i32),

    #[error("message type '{name}' (id {id}) collides with an existing registration")]
    DuplicateRegistration { id: i32, name: String },

    #[error("no message registered with id {0}")]
    UnknownMessageId(i32),

    #[error("no message registered with name '{0}'")]
    UnknownMessageName(String),

    #[error("the endpoint must be bound or connected before calling {0}")]
    NotStarted(&'static str),

    #[error("field '{0}' is not declared on this message type")]
    UnknownField(&'static str),

    #[error("field '{field}' has type {expected}, not {actual}")]
    FieldTypeMismatch {
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Fatal-to-the-current-frame codec failures. The datagram containing the
/// offending frame is abandoned; the reader context logs and continues.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer underflow: needed {needed} bytes, had {remaining}")]
    Underflow { needed: usize, remaining: usize },

    #[error("field contained invalid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("no message registered with id {0}")]
    UnknownMessageId(i32),

    #[error("message larger than MTU ({size} > {mtu})")]
    OversizedMessage { size: usize, mtu: u16 },
}
