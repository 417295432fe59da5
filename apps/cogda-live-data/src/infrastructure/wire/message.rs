//! Self-describing wire message container.
//!
//! An ordered list of named fields. Names may repeat (list-valued fields
//! such as `availableServers` are written as one field per element), and
//! field values may themselves be messages.

use rust_decimal::Decimal;
use serde_json::{Map, Value};

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// Exact decimal (prices, rates).
    Decimal(Decimal),
    /// UTF-8 string.
    Str(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Nested message.
    Message(WireMessage),
}

impl FieldValue {
    /// Short type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Message(_) => "message",
        }
    }

    /// String content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float content, if this is a float.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Decimal content, if this is a decimal.
    #[must_use]
    pub const fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Nested message, if this is a message.
    #[must_use]
    pub const fn as_message(&self) -> Option<&WireMessage> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Decimal(d) => Value::String(d.to_string()),
            Self::Str(s) => Value::String(s.clone()),
            Self::Bytes(b) => Value::from(b.clone()),
            Self::Message(m) => m.to_json(),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<WireMessage> for FieldValue {
    fn from(value: WireMessage) -> Self {
        Self::Message(value)
    }
}

/// A named field.
#[derive(Debug, Clone, PartialEq)]
pub struct WireField {
    name: String,
    value: FieldValue,
}

impl WireField {
    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field value.
    #[must_use]
    pub const fn value(&self) -> &FieldValue {
        &self.value
    }
}

/// Ordered, self-describing message of named fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireMessage {
    fields: Vec<WireField>,
}

impl WireMessage {
    /// Create an empty message.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.push(WireField {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Append a field, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.add(name, value);
        self
    }

    /// Replace the first field with this name, or append it.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        if let Some(field) = self.fields.iter_mut().find(|f| f.name == name) {
            field.value = value;
        } else {
            self.fields.push(WireField {
                name: name.to_string(),
                value,
            });
        }
    }

    /// Apply every field of `changes` with [`set`](Self::set) semantics.
    pub fn merge(&mut self, changes: &Self) {
        for field in &changes.fields {
            self.set(&field.name, field.value.clone());
        }
    }

    /// First field with this exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }

    /// Every field with this exact name, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name == name)
            .map(|f| &f.value)
    }

    /// Whether a field with this name exists.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// All fields in insertion order.
    #[must_use]
    pub fn fields(&self) -> &[WireField] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the message has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Nesting depth; a flat message has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self
            .fields
            .iter()
            .filter_map(|f| f.value.as_message())
            .map(Self::depth)
            .max()
            .unwrap_or(0)
    }

    /// JSON rendering for logs. Repeated names become arrays.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for field in &self.fields {
            let value = field.value.to_json();
            match map.get_mut(&field.name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(field.name.clone(), value);
                }
            }
        }
        Value::Object(map)
    }
}

impl<N: Into<String>, V: Into<FieldValue>> FromIterator<(N, V)> for WireMessage {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut message = Self::new();
        for (name, value) in iter {
            message.add(name, value);
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn fields_keep_insertion_order() {
        let msg = WireMessage::new()
            .with("b", 1_i64)
            .with("a", "x")
            .with("c", true);

        let names: Vec<_> = msg.fields().iter().map(WireField::name).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn get_returns_first_match() {
        let msg = WireMessage::new()
            .with("server", "one")
            .with("server", "two");

        assert_eq!(msg.get("server").and_then(FieldValue::as_str), Some("one"));
        let all: Vec<_> = msg.get_all("server").filter_map(FieldValue::as_str).collect();
        assert_eq!(all, vec!["one", "two"]);
    }

    #[test]
    fn get_missing_is_none() {
        let msg = WireMessage::new();
        assert!(msg.get("nope").is_none());
        assert!(!msg.has_field("nope"));
        assert!(msg.is_empty());
    }

    #[test]
    fn set_replaces_or_appends() {
        let mut msg = WireMessage::new().with("bid", 1.0);
        msg.set("bid", 2.0);
        msg.set("ask", 3.0);

        assert_eq!(msg.len(), 2);
        assert_eq!(msg.get("bid").and_then(FieldValue::as_f64), Some(2.0));
        assert_eq!(msg.get("ask").and_then(FieldValue::as_f64), Some(3.0));
    }

    #[test]
    fn merge_applies_changes() {
        let mut values = WireMessage::new().with("bid", 1.0).with("ask", 2.0);
        let changes = WireMessage::new().with("ask", 2.5).with("last", 2.25);

        values.merge(&changes);

        assert_eq!(values.len(), 3);
        assert_eq!(values.get("ask").and_then(FieldValue::as_f64), Some(2.5));
    }

    #[test]
    fn depth_counts_nesting() {
        let inner = WireMessage::new().with("x", 1_i64);
        let middle = WireMessage::new().with("inner", inner);
        let outer = WireMessage::new().with("middle", middle).with("flat", 2_i64);

        assert_eq!(WireMessage::new().depth(), 1);
        assert_eq!(outer.depth(), 3);
    }

    #[test]
    fn typed_accessors_reject_other_types() {
        let value = FieldValue::from("text");
        assert_eq!(value.type_name(), "string");
        assert!(value.as_i64().is_none());
        assert!(value.as_message().is_none());

        let decimal = FieldValue::from(Decimal::from_str("1.25").unwrap());
        assert_eq!(decimal.as_decimal(), Some(Decimal::from_str("1.25").unwrap()));
    }

    #[test]
    fn to_json_groups_repeated_names() {
        let msg = WireMessage::new()
            .with("s", "a")
            .with("s", "b")
            .with("n", WireMessage::new().with("x", 1_i64));

        let json = msg.to_json();
        assert_eq!(json["s"], serde_json::json!(["a", "b"]));
        assert_eq!(json["n"]["x"], serde_json::json!(1));
    }

    #[test]
    fn collect_from_pairs() {
        let msg: WireMessage = vec![("a", 1_i64), ("b", 2_i64)].into_iter().collect();
        assert_eq!(msg.len(), 2);
    }
}
