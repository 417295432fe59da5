//! Push Dispatcher
//!
//! One task per connection. Reads feed updates from the broadcast hub,
//! keeps those for `Active` entries of the connection's subscription table
//! and queues them as `LIVE_DATA_UPDATE` messages on the connection's
//! outbound channel. A single task per connection keeps updates for a feed
//! in the order they were published.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::domain::subscription::{ConnectionId, SubscriptionTable};
use crate::infrastructure::broadcast::FeedUpdate;
use crate::infrastructure::cogda::messages::{CogdaMessage, LiveDataUpdate};
use crate::infrastructure::metrics;

/// Counters reported when a dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Updates queued for the connection.
    pub sent: u64,
    /// Updates lost because the dispatcher fell behind.
    pub dropped: u64,
}

/// Routes broadcast feed updates to one connection.
pub struct PushDispatcher {
    connection_id: ConnectionId,
    table: Arc<SubscriptionTable>,
    updates_rx: broadcast::Receiver<FeedUpdate>,
    outbound: mpsc::Sender<CogdaMessage>,
    cancel: CancellationToken,
}

impl PushDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(
        connection_id: ConnectionId,
        table: Arc<SubscriptionTable>,
        updates_rx: broadcast::Receiver<FeedUpdate>,
        outbound: mpsc::Sender<CogdaMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            table,
            updates_rx,
            outbound,
            cancel,
        }
    }

    /// Build the push message for an update, if the feed is subscribed.
    #[must_use]
    pub fn route(&self, update: FeedUpdate) -> Option<CogdaMessage> {
        let entry = self.table.active_entry(&update.subscription_id)?;
        Some(CogdaMessage::LiveDataUpdate(LiveDataUpdate::new(
            update.subscription_id,
            entry.normalization_scheme().cloned(),
            update.changes,
        )))
    }

    /// Dispatch until cancelled, the hub closes, or the connection's
    /// outbound queue is gone.
    pub async fn run(mut self) -> DispatchStats {
        let mut stats = DispatchStats::default();

        loop {
            let received = tokio::select! {
                () = self.cancel.cancelled() => break,
                received = self.updates_rx.recv() => received,
            };

            match received {
                Ok(update) => {
                    let Some(message) = self.route(update) else {
                        continue;
                    };
                    if self.outbound.send(message).await.is_err() {
                        break;
                    }
                    stats.sent += 1;
                    metrics::record_updates_sent(1);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        connection_id = self.connection_id,
                        lagged = n,
                        "Update receiver lagged"
                    );
                    stats.dropped += n;
                    metrics::record_updates_dropped(n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }

        tracing::debug!(
            connection_id = self.connection_id,
            sent = stats.sent,
            dropped = stats.dropped,
            "Push dispatcher stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::identifiers::{NormalizationScheme, SubscriptionId};
    use crate::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
    use crate::infrastructure::wire::WireMessage;

    fn id(value: &str) -> SubscriptionId {
        SubscriptionId::new("a", value).unwrap()
    }

    fn update(value: &str, price: f64) -> FeedUpdate {
        FeedUpdate {
            subscription_id: id(value),
            changes: WireMessage::new().with("Market_Value", price),
        }
    }

    fn activate(table: &SubscriptionTable, value: &str, scheme: Option<&str>) {
        let scheme = scheme.map(|s| NormalizationScheme::new(s).unwrap());
        table.begin(&id(value), scheme.clone());
        table.activate(&id(value), &id(value), scheme);
    }

    #[test]
    fn route_uses_entry_scheme_and_skips_inactive() {
        let hub = BroadcastHub::with_defaults();
        let table = Arc::new(SubscriptionTable::new());
        activate(&table, "b", Some("scheme"));
        table.begin(&id("pending"), None);
        let (tx, _rx) = mpsc::channel(4);
        let dispatcher =
            PushDispatcher::new(1, Arc::clone(&table), hub.updates_rx(), tx, CancellationToken::new());

        let Some(CogdaMessage::LiveDataUpdate(pushed)) = dispatcher.route(update("b", 1.0)) else {
            panic!("expected a live data update");
        };
        assert_eq!(pushed.subscription_id(), &id("b"));
        assert_eq!(pushed.normalization_scheme().map(NormalizationScheme::as_str), Some("scheme"));
        assert_eq!(pushed.values().len(), 1);

        assert!(dispatcher.route(update("pending", 1.0)).is_none());
        assert!(dispatcher.route(update("unknown", 1.0)).is_none());
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let hub = BroadcastHub::with_defaults();
        let table = Arc::new(SubscriptionTable::new());
        activate(&table, "b", None);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let dispatcher = PushDispatcher::new(1, table, hub.updates_rx(), tx, cancel.clone());
        let handle = tokio::spawn(dispatcher.run());

        for price in [1.0, 2.0, 3.0] {
            hub.send_update(update("b", price));
            hub.send_update(update("other", price));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            let Some(CogdaMessage::LiveDataUpdate(pushed)) = rx.recv().await else {
                panic!("expected a live data update");
            };
            seen.push(pushed.values().get("Market_Value").and_then(|v| v.as_f64()));
        }
        assert_eq!(seen, vec![Some(1.0), Some(2.0), Some(3.0)]);

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.sent, 3);
    }

    #[tokio::test]
    async fn stops_after_unsubscribe_removes_entry() {
        let hub = BroadcastHub::with_defaults();
        let table = Arc::new(SubscriptionTable::new());
        activate(&table, "b", None);
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher =
            PushDispatcher::new(1, Arc::clone(&table), hub.updates_rx(), tx, CancellationToken::new());

        table.remove(&id("b"));
        assert!(dispatcher.route(update("b", 1.0)).is_none());

        drop(dispatcher);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn counts_lagged_updates() {
        let hub = BroadcastHub::new(BroadcastConfig { updates_capacity: 2 });
        let table = Arc::new(SubscriptionTable::new());
        activate(&table, "b", None);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let dispatcher = PushDispatcher::new(1, table, hub.updates_rx(), tx, cancel.clone());

        for price in [1.0, 2.0, 3.0, 4.0] {
            hub.send_update(update("b", price));
        }
        let handle = tokio::spawn(dispatcher.run());

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        cancel.cancel();

        let stats = handle.await.unwrap();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.sent, 2);
    }

    #[tokio::test]
    async fn stops_when_outbound_closes() {
        let hub = BroadcastHub::with_defaults();
        let table = Arc::new(SubscriptionTable::new());
        activate(&table, "b", None);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let dispatcher = PushDispatcher::new(1, table, hub.updates_rx(), tx, CancellationToken::new());
        let handle = tokio::spawn(dispatcher.run());

        hub.send_update(update("b", 1.0));

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.sent, 0);
    }
}
