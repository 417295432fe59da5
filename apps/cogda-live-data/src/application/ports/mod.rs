//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `LiveDataSource`: resolves a subscription id to its current values
//! - `Authenticator`: validates connection credentials
//! - `EntitlementChecker`: decides whether a user may read a feed

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::identifiers::{NormalizationScheme, SubscriptionId};
use crate::infrastructure::wire::WireMessage;

// =============================================================================
// Live Data Source
// =============================================================================

/// Current state of a feed as resolved by a [`LiveDataSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    /// Resolved subscription id (may be canonicalized by the source).
    pub subscription_id: SubscriptionId,
    /// Scheme the values are expressed in.
    pub normalization_scheme: Option<NormalizationScheme>,
    /// Current field values.
    pub values: WireMessage,
}

/// Errors from resolving a feed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// No feed exists for the id.
    #[error("no live data for {0}")]
    NotFound(SubscriptionId),

    /// The source refused the id.
    #[error("not authorized for {0}")]
    NotAuthorized(SubscriptionId),

    /// The source failed.
    #[error("live data source error: {0}")]
    Internal(String),
}

/// Source of live feed values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveDataSource: Send + Sync {
    /// Resolve a feed and return its current values.
    ///
    /// `scheme` is the normalization the client asked for, if any.
    async fn resolve<'a>(
        &self,
        id: &SubscriptionId,
        scheme: Option<&'a NormalizationScheme>,
    ) -> Result<FeedSnapshot, SourceError>;
}

// =============================================================================
// Access Control
// =============================================================================

/// Validates connection credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether `user_name` with `password` may open a session.
    async fn authenticate<'a>(&self, user_name: &str, password: Option<&'a str>) -> bool;
}

/// Per-feed entitlement decisions.
#[cfg_attr(test, mockall::automock)]
pub trait EntitlementChecker: Send + Sync {
    /// Whether `user_name` may subscribe to or snapshot `id`.
    fn is_entitled(&self, user_name: &str, id: &SubscriptionId) -> bool;
}
