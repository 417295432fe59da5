//! Wire error types.

use thiserror::Error;

/// A decoded container does not form a valid protocol message.
///
/// Raised locally; never sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    /// A mandatory field is absent.
    #[error("missing mandatory field `{0}`")]
    MissingField(&'static str),

    /// A field is present with the wrong value type.
    #[error("field `{field}` must be a {expected}, found {found}")]
    WrongType {
        /// Field name.
        field: &'static str,
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        found: &'static str,
    },

    /// A field has the right type but an unusable value.
    #[error("field `{field}` has invalid value: {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// `MESSAGE_TYPE` names no known message kind.
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),

    /// The message decoded to a different kind than the caller expected.
    #[error("expected {expected} message, found {found}")]
    UnexpectedMessageType {
        /// Expected kind name.
        expected: &'static str,
        /// Actual kind name.
        found: &'static str,
    },
}

/// Errors from encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// Container decoded but is not a valid protocol message.
    #[error("malformed message: {0}")]
    Malformed(#[from] MalformedMessage),

    /// Nesting exceeds the context limit.
    #[error("message nesting exceeds {limit} levels")]
    TooDeep {
        /// Configured depth limit.
        limit: usize,
    },

    /// Encoded size exceeds the context limit.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Encoded size.
        size: usize,
        /// Configured size limit.
        limit: usize,
    },

    /// `MessagePack` encoding failed.
    #[error("`MessagePack` encode error: {0}")]
    Encode(String),

    /// `MessagePack` decoding failed.
    #[error("`MessagePack` decode error: {0}")]
    Decode(String),

    /// Bytes decoded as `MessagePack` but not as a wire message.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

impl WireError {
    /// Whether this is a malformed-message error.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}
