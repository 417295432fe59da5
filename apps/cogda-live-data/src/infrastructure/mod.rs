//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Broadcast channel for feed updates.
pub mod broadcast;

/// Cogda protocol: messages, server, client.
pub mod cogda;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-memory and simulated live data.
pub mod source;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Generic wire container and `MessagePack` codec.
pub mod wire;
