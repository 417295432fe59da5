//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for feed sources and access control.
pub mod ports;

/// Subscription manager and push dispatcher.
pub mod services;
