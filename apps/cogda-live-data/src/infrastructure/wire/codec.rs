//! `MessagePack` Codec
//!
//! Binary encoding of [`WireMessage`] containers.
//!
//! # Format
//!
//! A message is a `MessagePack` array of `[name, value]` pairs, preserving
//! field order and repeated names:
//!
//! ```text
//! [["userName","alice"],["capabilities",[]],["MESSAGE_TYPE","CONNECTION_REQUEST"]]
//! ```
//!
//! Scalars map to native `MessagePack` types; nested messages recurse as
//! arrays; decimals travel as ext type [`DECIMAL_EXT_TYPE`] holding the
//! 16-byte `rust_decimal` serialization.
//!
//! Every call takes an explicit [`WireContext`]; the codec keeps no state.

use std::io::Cursor;

use rmpv::Value;
use rust_decimal::Decimal;

use super::error::WireError;
use super::message::{FieldValue, WireMessage};

/// `MessagePack` ext type tag for decimals.
pub const DECIMAL_EXT_TYPE: i8 = 1;

/// Default encoded size limit (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Default nesting limit.
pub const DEFAULT_MAX_DEPTH: usize = 32;

// =============================================================================
// Serialization Context
// =============================================================================

/// Limits applied to every encode and decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireContext {
    max_message_bytes: usize,
    max_depth: usize,
}

impl Default for WireContext {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl WireContext {
    /// Create a context with explicit limits.
    #[must_use]
    pub const fn new(max_message_bytes: usize, max_depth: usize) -> Self {
        Self {
            max_message_bytes,
            max_depth,
        }
    }

    /// Maximum encoded message size in bytes.
    #[must_use]
    pub const fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Maximum nesting depth (a flat message has depth 1).
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Reject messages nested deeper than the limit.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::TooDeep`] if the limit is exceeded.
    pub fn check_depth(&self, message: &WireMessage) -> Result<(), WireError> {
        if message.depth() > self.max_depth {
            return Err(WireError::TooDeep {
                limit: self.max_depth,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Codec
// =============================================================================

/// `MessagePack` codec for wire messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a message to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is too deep or too large for the
    /// context, or if writing fails.
    pub fn encode(&self, ctx: &WireContext, message: &WireMessage) -> Result<Vec<u8>, WireError> {
        let value = message_to_value(ctx, message, 1)?;

        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value)
            .map_err(|e| WireError::Encode(e.to_string()))?;

        if buf.len() > ctx.max_message_bytes {
            return Err(WireError::TooLarge {
                size: buf.len(),
                limit: ctx.max_message_bytes,
            });
        }

        Ok(buf)
    }

    /// Decode a message from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is too large, is not valid
    /// `MessagePack`, has trailing bytes, or does not follow the pair
    /// layout.
    pub fn decode(&self, ctx: &WireContext, data: &[u8]) -> Result<WireMessage, WireError> {
        if data.len() > ctx.max_message_bytes {
            return Err(WireError::TooLarge {
                size: data.len(),
                limit: ctx.max_message_bytes,
            });
        }

        let mut cursor = Cursor::new(data);
        let value =
            rmpv::decode::read_value(&mut cursor).map_err(|e| WireError::Decode(e.to_string()))?;

        let consumed = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
        if consumed != data.len() {
            return Err(WireError::InvalidFormat(format!(
                "{} trailing bytes after message",
                data.len().saturating_sub(consumed)
            )));
        }

        value_to_message(ctx, value, 1)
    }
}

// =============================================================================
// Value Conversion
// =============================================================================

fn message_to_value(
    ctx: &WireContext,
    message: &WireMessage,
    depth: usize,
) -> Result<Value, WireError> {
    if depth > ctx.max_depth {
        return Err(WireError::TooDeep {
            limit: ctx.max_depth,
        });
    }

    let pairs = message
        .fields()
        .iter()
        .map(|field| {
            let value = field_to_value(ctx, field.value(), depth)?;
            Ok(Value::Array(vec![Value::from(field.name()), value]))
        })
        .collect::<Result<Vec<_>, WireError>>()?;

    Ok(Value::Array(pairs))
}

fn field_to_value(ctx: &WireContext, value: &FieldValue, depth: usize) -> Result<Value, WireError> {
    Ok(match value {
        FieldValue::Bool(b) => Value::Boolean(*b),
        FieldValue::Int(i) => Value::from(*i),
        FieldValue::Float(f) => Value::F64(*f),
        FieldValue::Decimal(d) => Value::Ext(DECIMAL_EXT_TYPE, d.serialize().to_vec()),
        FieldValue::Str(s) => Value::from(s.as_str()),
        FieldValue::Bytes(b) => Value::Binary(b.clone()),
        FieldValue::Message(m) => message_to_value(ctx, m, depth + 1)?,
    })
}

fn value_to_message(ctx: &WireContext, value: Value, depth: usize) -> Result<WireMessage, WireError> {
    if depth > ctx.max_depth {
        return Err(WireError::TooDeep {
            limit: ctx.max_depth,
        });
    }

    let Value::Array(pairs) = value else {
        return Err(WireError::InvalidFormat(
            "message must be an array of [name, value] pairs".to_string(),
        ));
    };

    let mut message = WireMessage::new();
    for pair in pairs {
        let Value::Array(mut parts) = pair else {
            return Err(WireError::InvalidFormat(
                "field must be a [name, value] pair".to_string(),
            ));
        };
        if parts.len() != 2 {
            return Err(WireError::InvalidFormat(format!(
                "field pair has {} elements",
                parts.len()
            )));
        }

        let raw_value = parts.pop().unwrap_or(Value::Nil);
        let raw_name = parts.pop().unwrap_or(Value::Nil);

        let Value::String(name) = raw_name else {
            return Err(WireError::InvalidFormat(
                "field name must be a string".to_string(),
            ));
        };
        let name = name
            .into_str()
            .ok_or_else(|| WireError::InvalidFormat("field name is not UTF-8".to_string()))?;

        let field = value_to_field(ctx, raw_value, depth)?;
        message.add(name, field);
    }

    Ok(message)
}

fn value_to_field(ctx: &WireContext, value: Value, depth: usize) -> Result<FieldValue, WireError> {
    match value {
        Value::Boolean(b) => Ok(FieldValue::Bool(b)),
        Value::Integer(i) => i.as_i64().map(FieldValue::Int).ok_or_else(|| {
            WireError::InvalidFormat(format!("integer {i} does not fit in i64"))
        }),
        Value::F32(f) => Ok(FieldValue::Float(f64::from(f))),
        Value::F64(f) => Ok(FieldValue::Float(f)),
        Value::String(s) => s
            .into_str()
            .map(FieldValue::Str)
            .ok_or_else(|| WireError::InvalidFormat("string value is not UTF-8".to_string())),
        Value::Binary(b) => Ok(FieldValue::Bytes(b)),
        Value::Ext(DECIMAL_EXT_TYPE, bytes) => {
            let raw: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                WireError::InvalidFormat(format!(
                    "decimal ext must be 16 bytes, found {}",
                    bytes.len()
                ))
            })?;
            Ok(FieldValue::Decimal(Decimal::deserialize(raw)))
        }
        Value::Ext(tag, _) => Err(WireError::InvalidFormat(format!(
            "unsupported ext type {tag}"
        ))),
        nested @ Value::Array(_) => Ok(FieldValue::Message(value_to_message(
            ctx,
            nested,
            depth + 1,
        )?)),
        Value::Nil => Err(WireError::InvalidFormat(
            "nil is not a valid field value".to_string(),
        )),
        Value::Map(_) => Err(WireError::InvalidFormat(
            "maps are not valid field values".to_string(),
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use proptest::prelude::*;

    use super::*;

    fn sample() -> WireMessage {
        WireMessage::new()
            .with("flag", true)
            .with("count", -42_i64)
            .with("ratio", 0.125)
            .with("price", Decimal::from_str("101.2500").unwrap())
            .with("name", "GBP_5Y")
            .with("raw", vec![0_u8, 1, 2])
            .with("nested", WireMessage::new().with("bid", 1.5).with("bid", 1.6))
            .with("empty", WireMessage::new())
    }

    #[test]
    fn round_trip_all_field_types() {
        let ctx = WireContext::default();
        let codec = MsgPackCodec::new();

        let bytes = codec.encode(&ctx, &sample()).unwrap();
        let decoded = codec.decode(&ctx, &bytes).unwrap();

        assert_eq!(decoded, sample());
    }

    #[test]
    fn decimal_keeps_scale() {
        let ctx = WireContext::default();
        let codec = MsgPackCodec::new();
        let msg = WireMessage::new().with("p", Decimal::from_str("1.5000").unwrap());

        let decoded = codec.decode(&ctx, &codec.encode(&ctx, &msg).unwrap()).unwrap();

        let price = decoded.get("p").and_then(FieldValue::as_decimal).unwrap();
        assert_eq!(price.scale(), 4);
    }

    #[test]
    fn encode_rejects_oversized_message() {
        let ctx = WireContext::new(16, DEFAULT_MAX_DEPTH);
        let msg = WireMessage::new().with("payload", "x".repeat(64));

        let err = MsgPackCodec::new().encode(&ctx, &msg).unwrap_err();
        assert!(matches!(err, WireError::TooLarge { limit: 16, .. }));
    }

    #[test]
    fn decode_rejects_oversized_input() {
        let ctx = WireContext::new(4, DEFAULT_MAX_DEPTH);
        let err = MsgPackCodec::new().decode(&ctx, &[0x90; 8]).unwrap_err();
        assert!(matches!(err, WireError::TooLarge { size: 8, limit: 4 }));
    }

    #[test]
    fn depth_limit_applies_both_ways() {
        let deep = WireMessage::new().with(
            "a",
            WireMessage::new().with("b", WireMessage::new().with("c", 1_i64)),
        );
        let strict = WireContext::new(DEFAULT_MAX_MESSAGE_BYTES, 2);
        let codec = MsgPackCodec::new();

        assert!(matches!(
            codec.encode(&strict, &deep),
            Err(WireError::TooDeep { limit: 2 })
        ));
        assert!(strict.check_depth(&deep).is_err());

        let bytes = codec.encode(&WireContext::default(), &deep).unwrap();
        assert!(matches!(
            codec.decode(&strict, &bytes),
            Err(WireError::TooDeep { limit: 2 })
        ));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let ctx = WireContext::default();
        let codec = MsgPackCodec::new();
        let mut bytes = codec.encode(&ctx, &WireMessage::new()).unwrap();
        bytes.push(0xc0);

        let err = codec.decode(&ctx, &bytes).unwrap_err();
        assert!(matches!(err, WireError::InvalidFormat(_)));
    }

    #[test]
    fn decode_rejects_non_array_message() {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &Value::from("hello")).unwrap();

        let err = MsgPackCodec::new()
            .decode(&WireContext::default(), &buf)
            .unwrap_err();
        assert!(matches!(err, WireError::InvalidFormat(_)));
    }

    #[test]
    fn decode_rejects_nil_field_value() {
        let value = Value::Array(vec![Value::Array(vec![Value::from("x"), Value::Nil])]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value).unwrap();

        let err = MsgPackCodec::new()
            .decode(&WireContext::default(), &buf)
            .unwrap_err();
        assert!(matches!(err, WireError::InvalidFormat(_)));
    }

    #[test]
    fn decode_rejects_short_decimal_ext() {
        let value = Value::Array(vec![Value::Array(vec![
            Value::from("p"),
            Value::Ext(DECIMAL_EXT_TYPE, vec![1, 2, 3]),
        ])]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &value).unwrap();

        let err = MsgPackCodec::new()
            .decode(&WireContext::default(), &buf)
            .unwrap_err();
        assert!(err.to_string().contains("16 bytes"));
    }

    #[test]
    fn decode_garbage_is_an_error() {
        let err = MsgPackCodec::new()
            .decode(&WireContext::default(), &[0xc1])
            .unwrap_err();
        assert!(matches!(err, WireError::Decode(_) | WireError::InvalidFormat(_)));
    }

    fn arb_scalar() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            any::<bool>().prop_map(FieldValue::Bool),
            any::<i64>().prop_map(FieldValue::Int),
            (-1.0e12..1.0e12f64).prop_map(FieldValue::Float),
            (any::<i64>(), 0u32..10).prop_map(|(m, s)| FieldValue::Decimal(Decimal::new(m, s))),
            "[a-zA-Z0-9_ ]{0,16}".prop_map(FieldValue::Str),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(FieldValue::Bytes),
        ]
    }

    fn arb_message() -> impl Strategy<Value = WireMessage> {
        let leaf = proptest::collection::vec(("[a-zA-Z]{1,8}", arb_scalar()), 0..6)
            .prop_map(|fields| fields.into_iter().collect::<WireMessage>());
        leaf.prop_recursive(3, 32, 4, |inner| {
            proptest::collection::vec(
                (
                    "[a-zA-Z]{1,8}",
                    prop_oneof![arb_scalar(), inner.prop_map(FieldValue::Message)],
                ),
                0..6,
            )
            .prop_map(|fields| fields.into_iter().collect::<WireMessage>())
        })
    }

    proptest! {
        #[test]
        fn codec_round_trips_arbitrary_messages(msg in arb_message()) {
            let ctx = WireContext::default();
            let codec = MsgPackCodec::new();
            let bytes = codec.encode(&ctx, &msg).unwrap();
            prop_assert_eq!(codec.decode(&ctx, &bytes).unwrap(), msg);
        }
    }
}
