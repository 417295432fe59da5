//! Wire Container and Codec
//!
//! The generic, self-describing message container that protocol messages
//! are mapped onto, and its `MessagePack` encoding.

mod codec;
mod error;
mod message;

pub use codec::{
    DECIMAL_EXT_TYPE, DEFAULT_MAX_DEPTH, DEFAULT_MAX_MESSAGE_BYTES, MsgPackCodec, WireContext,
};
pub use error::{MalformedMessage, WireError};
pub use message::{FieldValue, WireField, WireMessage};
