//! Subscription Service
//!
//! Answers subscribe, snapshot and unsubscribe requests for one established
//! connection. Entitlement is checked first, then the feed is resolved
//! through the [`LiveDataSource`] port. Every outcome travels back as data:
//! a failed request still gets a response with an empty payload and a
//! `userMessage`.

use std::sync::Arc;
use std::time::Instant;

use crate::application::ports::{EntitlementChecker, FeedSnapshot, LiveDataSource, SourceError};
use crate::domain::identifiers::SubscriptionId;
use crate::domain::results::GenericResult;
use crate::domain::subscription::{
    ConnectionId, FeedRegistry, SubscriptionState, SubscriptionTable,
};
use crate::infrastructure::cogda::messages::{
    FeedRequest, ResponseFields, SnapshotResponse, SubscriptionResponse,
};
use crate::infrastructure::metrics::{self, RequestKind};
use crate::infrastructure::wire::WireMessage;

/// Outcome of a resolution attempt, before it is shaped into a response.
struct Resolution {
    fields: ResponseFields,
    payload: WireMessage,
}

/// Per-connection subscription manager.
pub struct SubscriptionService {
    connection_id: ConnectionId,
    user_name: String,
    table: Arc<SubscriptionTable>,
    registry: Arc<FeedRegistry>,
    source: Arc<dyn LiveDataSource>,
    entitlements: Arc<dyn EntitlementChecker>,
}

impl std::fmt::Debug for SubscriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionService")
            .field("connection_id", &self.connection_id)
            .field("user_name", &self.user_name)
            .field("table", &self.table.stats())
            .finish_non_exhaustive()
    }
}

impl SubscriptionService {
    /// Create a service with an empty subscription table.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        user_name: impl Into<String>,
        registry: Arc<FeedRegistry>,
        source: Arc<dyn LiveDataSource>,
        entitlements: Arc<dyn EntitlementChecker>,
    ) -> Self {
        Self {
            connection_id,
            user_name: user_name.into(),
            table: Arc::new(SubscriptionTable::new()),
            registry,
            source,
            entitlements,
        }
    }

    /// Connection this service belongs to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The subscription table, shared with the push dispatcher.
    #[must_use]
    pub fn table(&self) -> Arc<SubscriptionTable> {
        Arc::clone(&self.table)
    }

    /// Handle a subscription request.
    ///
    /// On success the entry becomes `Active` under the resolved id and the
    /// feed is counted in the registry. If the id was unsubscribed while the
    /// request was pending, the response is still sent but no entry remains.
    pub async fn subscribe(&self, request: &FeedRequest) -> SubscriptionResponse {
        let started = Instant::now();
        let requested = request.subscription_id();

        let resolution = if let Some(denied) = self.check_entitlement(request) {
            denied
        } else {
            let previous = self
                .table
                .begin(requested, request.normalization_scheme().cloned());

            match self.resolve(request).await {
                Ok(snapshot) => {
                    self.activate(requested, previous, &snapshot);
                    Resolution {
                        fields: ResponseFields::answering(
                            request,
                            snapshot.subscription_id,
                            snapshot.normalization_scheme,
                            GenericResult::Successful,
                            None,
                        ),
                        payload: snapshot.values,
                    }
                }
                Err(failure) => {
                    self.table.abandon(requested);
                    failure
                }
            }
        };

        self.record(RequestKind::Subscribe, &resolution.fields, started);
        SubscriptionResponse::new(resolution.fields, resolution.payload)
    }

    /// Handle a snapshot request. Never touches the subscription table.
    pub async fn snapshot(&self, request: &FeedRequest) -> SnapshotResponse {
        let started = Instant::now();

        let resolution = if let Some(denied) = self.check_entitlement(request) {
            denied
        } else {
            match self.resolve(request).await {
                Ok(snapshot) => Resolution {
                    fields: ResponseFields::answering(
                        request,
                        snapshot.subscription_id,
                        snapshot.normalization_scheme,
                        GenericResult::Successful,
                        None,
                    ),
                    payload: snapshot.values,
                },
                Err(failure) => failure,
            }
        };

        self.record(RequestKind::Snapshot, &resolution.fields, started);
        SnapshotResponse::new(resolution.fields, resolution.payload)
    }

    /// Handle an unsubscribe. Idempotent.
    ///
    /// Returns whether an entry was removed.
    pub fn unsubscribe(&self, request: &FeedRequest) -> bool {
        let id = request.subscription_id();
        let removed = self.table.remove(id).is_some();

        if self.registry.remove(self.connection_id, id) {
            tracing::debug!(subscription_id = %id, "Feed has no subscribers left");
        }

        tracing::debug!(
            connection_id = self.connection_id,
            subscription_id = %id,
            removed,
            "Unsubscribe"
        );
        metrics::record_request(RequestKind::Unsubscribe, GenericResult::Successful);
        removed
    }

    /// Drop every subscription after connection loss.
    ///
    /// Returns the number of subscriptions that were active.
    pub fn disconnect(&self) -> usize {
        let active = self.table.clear();
        let changes = self.registry.connection_closed(self.connection_id);

        tracing::debug!(
            connection_id = self.connection_id,
            active = active.len(),
            deactivated_feeds = changes.deactivated.len(),
            "Subscriptions released"
        );
        active.len()
    }

    fn check_entitlement(&self, request: &FeedRequest) -> Option<Resolution> {
        let id = request.subscription_id();
        if self.entitlements.is_entitled(&self.user_name, id) {
            return None;
        }

        tracing::info!(
            connection_id = self.connection_id,
            user_name = %self.user_name,
            subscription_id = %id,
            "Request denied by entitlements"
        );
        Some(failure(
            request,
            GenericResult::NotAuthorized,
            format!("user {} is not entitled to {id}", self.user_name),
        ))
    }

    async fn resolve(&self, request: &FeedRequest) -> Result<FeedSnapshot, Resolution> {
        self.source
            .resolve(request.subscription_id(), request.normalization_scheme())
            .await
            .map_err(|e| {
                let result = match &e {
                    SourceError::NotFound(_) => GenericResult::NotAvailable,
                    SourceError::NotAuthorized(_) => GenericResult::NotAuthorized,
                    SourceError::Internal(_) => GenericResult::InternalError,
                };
                if result == GenericResult::InternalError {
                    tracing::warn!(
                        connection_id = self.connection_id,
                        subscription_id = %request.subscription_id(),
                        error = %e,
                        "Feed resolution failed"
                    );
                }
                failure(request, result, e.to_string())
            })
    }

    fn activate(
        &self,
        requested: &SubscriptionId,
        previous: Option<SubscriptionState>,
        snapshot: &FeedSnapshot,
    ) {
        let resolved = &snapshot.subscription_id;

        // Count the feed before the entry turns active so a racing
        // unsubscribe always finds something to release.
        let first = self.registry.add(self.connection_id, resolved);

        if !self
            .table
            .activate(requested, resolved, snapshot.normalization_scheme.clone())
        {
            self.registry.remove(self.connection_id, resolved);
            tracing::debug!(
                connection_id = self.connection_id,
                subscription_id = %requested,
                "Unsubscribed while pending"
            );
            return;
        }

        if requested != resolved && previous == Some(SubscriptionState::Active) {
            self.registry.remove(self.connection_id, requested);
        }

        tracing::debug!(
            connection_id = self.connection_id,
            subscription_id = %resolved,
            first_subscriber = first,
            "Subscription active"
        );
    }

    fn record(&self, kind: RequestKind, fields: &ResponseFields, started: Instant) {
        metrics::record_request(kind, fields.generic_result());
        metrics::record_request_duration(kind, started.elapsed());
        tracing::debug!(
            connection_id = self.connection_id,
            correlation_id = ?fields.correlation_id(),
            subscription_id = %fields.subscription_id(),
            result = %fields.generic_result(),
            "Request answered"
        );
    }
}

fn failure(request: &FeedRequest, result: GenericResult, message: String) -> Resolution {
    Resolution {
        fields: ResponseFields::answering(
            request,
            request.subscription_id().clone(),
            request.normalization_scheme().cloned(),
            result,
            Some(message),
        ),
        payload: WireMessage::new(),
    }
}
