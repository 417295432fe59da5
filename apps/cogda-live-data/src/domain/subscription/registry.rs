//! Server-wide feed reference counting.
//!
//! Many connections may subscribe to the same feed; the registry tracks
//! which feeds have at least one active subscriber so the data source
//! produces updates only for watched feeds.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::ConnectionId;
use crate::domain::identifiers::SubscriptionId;

/// Feeds whose watched status changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedChanges {
    /// Feeds that gained their first subscriber.
    pub activated: Vec<SubscriptionId>,
    /// Feeds that lost their last subscriber.
    pub deactivated: Vec<SubscriptionId>,
}

impl FeedChanges {
    /// Check if there are any changes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.activated.is_empty() && self.deactivated.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Map from connection to the feeds it holds.
    connection_feeds: HashMap<ConnectionId, HashSet<SubscriptionId>>,
    /// Map from feed to number of connections holding it.
    feed_refcount: HashMap<SubscriptionId, usize>,
}

impl RegistryState {
    fn release(&mut self, feed: &SubscriptionId) -> bool {
        let Some(refcount) = self.feed_refcount.get_mut(feed) else {
            return false;
        };
        *refcount = refcount.saturating_sub(1);
        if *refcount == 0 {
            self.feed_refcount.remove(feed);
            return true;
        }
        false
    }
}

/// Reference counts of active feeds across all connections.
///
/// ```rust
/// use cogda_live_data::domain::identifiers::SubscriptionId;
/// use cogda_live_data::domain::subscription::FeedRegistry;
///
/// let registry = FeedRegistry::new();
/// let feed = SubscriptionId::new("ICAP", "GBP_5Y").unwrap();
///
/// assert!(registry.add(1, &feed));
/// assert!(!registry.add(2, &feed));
/// assert!(!registry.remove(1, &feed));
/// assert!(registry.remove(2, &feed));
/// ```
#[derive(Debug, Default)]
pub struct FeedRegistry {
    state: RwLock<RegistryState>,
}

impl FeedRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a connection holds a feed.
    ///
    /// Returns `true` if this is the feed's first subscriber.
    pub fn add(&self, connection: ConnectionId, feed: &SubscriptionId) -> bool {
        let mut state = self.state.write();
        let held = state.connection_feeds.entry(connection).or_default();

        if !held.insert(feed.clone()) {
            return false;
        }

        let refcount = state.feed_refcount.entry(feed.clone()).or_insert(0);
        *refcount += 1;
        *refcount == 1
    }

    /// Record that a connection released a feed.
    ///
    /// Returns `true` if the feed lost its last subscriber.
    pub fn remove(&self, connection: ConnectionId, feed: &SubscriptionId) -> bool {
        let mut state = self.state.write();
        let Some(held) = state.connection_feeds.get_mut(&connection) else {
            return false;
        };
        if !held.remove(feed) {
            return false;
        }
        if held.is_empty() {
            state.connection_feeds.remove(&connection);
        }

        state.release(feed)
    }

    /// Release every feed held by a connection.
    ///
    /// Returns the feeds that are no longer watched by anyone.
    pub fn connection_closed(&self, connection: ConnectionId) -> FeedChanges {
        let mut state = self.state.write();
        let Some(held) = state.connection_feeds.remove(&connection) else {
            return FeedChanges::default();
        };

        let deactivated = held
            .into_iter()
            .filter(|feed| state.release(feed))
            .collect();

        FeedChanges {
            activated: Vec::new(),
            deactivated,
        }
    }

    /// Whether any connection holds the feed.
    #[must_use]
    pub fn is_active(&self, feed: &SubscriptionId) -> bool {
        self.state.read().feed_refcount.contains_key(feed)
    }

    /// All feeds with at least one subscriber.
    #[must_use]
    pub fn active_feeds(&self) -> Vec<SubscriptionId> {
        self.state.read().feed_refcount.keys().cloned().collect()
    }

    /// Feeds held by a connection.
    #[must_use]
    pub fn connection_feeds(&self, connection: ConnectionId) -> Vec<SubscriptionId> {
        self.state
            .read()
            .connection_feeds
            .get(&connection)
            .map(|feeds| feeds.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            feed_count: state.feed_refcount.len(),
            connection_count: state.connection_feeds.len(),
        }
    }
}

/// Statistics for the feed registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of distinct active feeds.
    pub feed_count: usize,
    /// Number of connections holding at least one feed.
    pub connection_count: usize,
}
