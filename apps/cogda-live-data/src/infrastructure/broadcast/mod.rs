//! Broadcast Hub
//!
//! Fan-out of feed changes from the live data source to every connection's
//! push dispatcher over a single tokio broadcast channel. Each dispatcher
//! filters the stream down to its own active subscriptions.

use tokio::sync::broadcast;

use crate::domain::identifiers::SubscriptionId;
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::wire::WireMessage;

/// Changed fields of one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    /// Feed that changed.
    pub subscription_id: SubscriptionId,
    /// Only the fields that changed.
    pub changes: WireMessage,
}

/// Configuration for the broadcast channel.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Updates buffered per receiver before it lags.
    pub updates_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            updates_capacity: 10_000,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            updates_capacity: settings.updates_capacity,
        }
    }
}

/// Central hub for feed updates.
///
/// # Example
///
/// ```rust
/// use cogda_live_data::domain::identifiers::SubscriptionId;
/// use cogda_live_data::infrastructure::broadcast::{BroadcastConfig, BroadcastHub, FeedUpdate};
/// use cogda_live_data::infrastructure::wire::WireMessage;
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let mut rx = hub.updates_rx();
///
/// let id = SubscriptionId::new("TICKER", "AAPL").unwrap();
/// let sent = hub.send_update(FeedUpdate {
///     subscription_id: id.clone(),
///     changes: WireMessage::new().with("bid", 101.5),
/// });
/// assert_eq!(sent, Some(1));
/// assert_eq!(rx.try_recv().unwrap().subscription_id, id);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    updates_tx: broadcast::Sender<FeedUpdate>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            updates_tx: broadcast::channel(config.updates_capacity.max(1)).0,
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Send an update to all receivers.
    ///
    /// Returns the number of receivers that got it, or `None` if there are
    /// no receivers.
    pub fn send_update(&self, update: FeedUpdate) -> Option<usize> {
        self.updates_tx.send(update).ok()
    }

    /// Get a new receiver for updates.
    #[must_use]
    pub fn updates_rx(&self) -> broadcast::Receiver<FeedUpdate> {
        self.updates_tx.subscribe()
    }

    /// Number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.updates_tx.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(value: &str) -> FeedUpdate {
        FeedUpdate {
            subscription_id: SubscriptionId::new("TICKER", value).unwrap(),
            changes: WireMessage::new().with("last", 1.0),
        }
    }

    #[test]
    fn default_capacity() {
        assert_eq!(BroadcastConfig::default().updates_capacity, 10_000);
    }

    #[test]
    fn send_without_receivers_returns_none() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.send_update(update("AAPL")), None);
    }

    #[tokio::test]
    async fn every_receiver_gets_each_update() {
        let hub = BroadcastHub::with_defaults();
        let mut rx1 = hub.updates_rx();
        let mut rx2 = hub.updates_rx();
        assert_eq!(hub.receiver_count(), 2);

        assert_eq!(hub.send_update(update("AAPL")), Some(2));

        assert_eq!(rx1.recv().await.unwrap(), update("AAPL"));
        assert_eq!(rx2.recv().await.unwrap(), update("AAPL"));
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let hub = BroadcastHub::new(BroadcastConfig {
            updates_capacity: 2,
        });
        let mut rx = hub.updates_rx();

        for symbol in ["A", "B", "C", "D"] {
            hub.send_update(update(symbol));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
    }

    #[test]
    fn dropped_receivers_are_not_counted() {
        let hub = BroadcastHub::with_defaults();
        let rx = hub.updates_rx();
        drop(rx);
        assert_eq!(hub.receiver_count(), 0);
    }
}
