//! Domain Layer - Protocol identity and subscription state.
//!
//! Pure types with no I/O: identifiers, outcome enumerations and the
//! subscription bookkeeping shared by the server and its dispatchers.

/// Subscription, correlation and normalization identifiers.
pub mod identifiers;

/// Generic and connection result enumerations.
pub mod results;

/// Per-connection subscription table and server-wide feed registry.
pub mod subscription;
