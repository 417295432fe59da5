//! Protocol Identifiers
//!
//! Value types naming feeds and requests on a Cogda connection.
//!
//! - [`SubscriptionId`]: `(scheme, value)` pair naming a feed instrument,
//!   carried on the wire as `subscriptionIdScheme` / `subscriptionIdValue`.
//! - [`CorrelationId`]: 64-bit token chosen by the client per request.
//! - [`NormalizationScheme`]: opaque tag describing value representation.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Separator used by the textual `scheme~value` form of a [`SubscriptionId`].
pub const ID_SEPARATOR: char = '~';

/// Errors raised when constructing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Scheme part is empty.
    #[error("subscription id scheme cannot be empty")]
    EmptyScheme,

    /// Value part is empty.
    #[error("subscription id value cannot be empty")]
    EmptyValue,

    /// Textual form is not `scheme~value`.
    #[error("invalid subscription id `{0}`: expected `scheme~value`")]
    InvalidFormat(String),

    /// Normalization scheme is empty.
    #[error("normalization scheme cannot be empty")]
    EmptyNormalization,
}

// =============================================================================
// Subscription Id
// =============================================================================

/// Identity of a live feed: an external id `(scheme, value)`.
///
/// Immutable once constructed; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId {
    scheme: String,
    value: String,
}

impl SubscriptionId {
    /// Create a subscription id.
    ///
    /// # Errors
    ///
    /// Returns an error if either part is empty.
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Result<Self, IdentifierError> {
        let scheme = scheme.into();
        let value = value.into();

        if scheme.is_empty() {
            return Err(IdentifierError::EmptyScheme);
        }
        if value.is_empty() {
            return Err(IdentifierError::EmptyValue);
        }

        Ok(Self { scheme, value })
    }

    /// The id scheme (e.g. `SURF`, `ICAP`).
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The id value within the scheme.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ID_SEPARATOR}{}", self.scheme, self.value)
    }
}

impl FromStr for SubscriptionId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, value) = s
            .split_once(ID_SEPARATOR)
            .ok_or_else(|| IdentifierError::InvalidFormat(s.to_string()))?;
        Self::new(scheme, value)
    }
}

// =============================================================================
// Correlation Id
// =============================================================================

/// Client-chosen token linking a request to its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(i64);

impl CorrelationId {
    /// Wrap a raw correlation value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw value as carried on the wire.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for CorrelationId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Normalization Scheme
// =============================================================================

/// Opaque tag describing how feed values are scaled or represented.
///
/// Absence (at the message level) means "default".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizationScheme(String);

impl NormalizationScheme {
    /// Create a normalization scheme tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentifierError::EmptyNormalization);
        }
        Ok(Self(name))
    }

    /// The tag as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
