#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Cogda Live Data - Market Data Distribution Server
//!
//! A WebSocket server and client for the Cogda live data protocol. Clients
//! authenticate with a connection handshake, then issue pipelined
//! subscribe/snapshot requests matched to responses by correlation id, and
//! receive push updates for their active subscriptions.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: identifiers, result enumerations, subscription tracking
//!   - `identifiers`: `SubscriptionId`, `CorrelationId`, `NormalizationScheme`
//!   - `results`: `GenericResult`, `ConnectionResult`
//!   - `subscription`: per-connection table and server-wide feed registry
//!
//! - **Application**: use cases and port definitions
//!   - `ports`: live data source, authenticator, entitlement checker
//!   - `services`: subscription manager and push dispatcher
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `wire`: generic message container and `MessagePack` codec
//!   - `cogda`: protocol messages, adapter, server, client
//!   - `source`: in-memory live data and simulated ticker
//!   - `broadcast`: feed update fan-out
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                      ┌─────────────┐     ┌──────────────┐
//! Simulated ticker ───►│  Broadcast  │────►│  Dispatcher  │──► Connection 1
//!  (publish changes)   │     Hub     │────►│  (per conn)  │──► Connection 2
//!                      └─────────────┘     └──────────────┘
//!
//! Client ── subscribe(correlationId) ──► SubscriptionService ── resolve ──► LiveDataSource
//!        ◄── response(correlationId) ──
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Identifiers, results and subscription state.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::identifiers::{CorrelationId, NormalizationScheme, SubscriptionId};
pub use domain::results::{ConnectionResult, GenericResult};
pub use domain::subscription::{ConnectionId, FeedRegistry, SubscriptionTable};

// Ports and services
pub use application::ports::{
    Authenticator, EntitlementChecker, FeedSnapshot, LiveDataSource, SourceError,
};
pub use application::services::{PushDispatcher, SubscriptionService};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServerConfig};

// Protocol server and client
pub use infrastructure::cogda::{
    ClientConfig, ClientError, CogdaClient, CogdaMessage, CogdaServer, ServerOptions,
    ServerPorts, ServerStatus,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub and live data
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastHub, FeedUpdate};
pub use infrastructure::source::{InMemoryLiveDataSource, SimulatedTicker, TickerConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
