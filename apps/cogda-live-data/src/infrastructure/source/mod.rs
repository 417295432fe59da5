//! Live Data Source
//!
//! In-memory feed store implementing [`LiveDataSource`]. Publishing merges
//! changed fields into the stored values and broadcasts just those changes
//! through the [`BroadcastHub`], where each connection's dispatcher picks
//! them up.
//!
//! Feeds are seeded from a CSV file of `scheme,value,field,number` rows
//! (`#` starts a comment) or from a small built-in set.

mod simulated;

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;

pub use simulated::{SimulatedTicker, TickerConfig};

use crate::application::ports::{FeedSnapshot, LiveDataSource, SourceError};
use crate::domain::identifiers::{NormalizationScheme, SubscriptionId};
use crate::infrastructure::broadcast::{BroadcastHub, FeedUpdate};
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::wire::WireMessage;

/// Id scheme of the built-in simulated feeds.
pub const SYNTHETIC_TICKER_SCHEME: &str = "OG_SYNTHETIC_TICKER";

/// Feeds and their current values.
#[derive(Debug)]
pub struct InMemoryLiveDataSource {
    feeds: RwLock<HashMap<SubscriptionId, WireMessage>>,
    hub: Arc<BroadcastHub>,
    default_scheme: Option<NormalizationScheme>,
}

impl InMemoryLiveDataSource {
    /// Create an empty source publishing to `hub`.
    ///
    /// `default_scheme` is reported when a request names no scheme.
    #[must_use]
    pub fn new(hub: Arc<BroadcastHub>, default_scheme: Option<NormalizationScheme>) -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            hub,
            default_scheme,
        }
    }

    /// Add or replace a feed.
    pub fn register(&self, id: SubscriptionId, values: WireMessage) {
        self.feeds.write().insert(id, values);
    }

    /// Add every feed in `feeds`.
    pub fn register_all(&self, feeds: impl IntoIterator<Item = (SubscriptionId, WireMessage)>) {
        let mut map = self.feeds.write();
        for (id, values) in feeds {
            map.insert(id, values);
        }
    }

    /// Merge `changes` into a feed and broadcast them.
    ///
    /// Returns the number of dispatchers that received the update.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotFound`] for an unknown feed.
    pub fn publish(&self, id: &SubscriptionId, changes: WireMessage) -> Result<usize, SourceError> {
        {
            let mut feeds = self.feeds.write();
            let values = feeds
                .get_mut(id)
                .ok_or_else(|| SourceError::NotFound(id.clone()))?;
            values.merge(&changes);
        }

        let delivered = self
            .hub
            .send_update(FeedUpdate {
                subscription_id: id.clone(),
                changes,
            })
            .unwrap_or(0);

        tracing::trace!(subscription_id = %id, delivered, "Published feed update");
        Ok(delivered)
    }

    /// Current values of a feed.
    #[must_use]
    pub fn values(&self, id: &SubscriptionId) -> Option<WireMessage> {
        self.feeds.read().get(id).cloned()
    }

    /// Ids of every known feed, sorted.
    #[must_use]
    pub fn feed_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.feeds.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of known feeds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.feeds.read().len()
    }

    /// Whether no feeds are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.feeds.read().is_empty()
    }
}

#[async_trait]
impl LiveDataSource for InMemoryLiveDataSource {
    async fn resolve<'a>(
        &self,
        id: &SubscriptionId,
        scheme: Option<&'a NormalizationScheme>,
    ) -> Result<FeedSnapshot, SourceError> {
        let values = self
            .values(id)
            .ok_or_else(|| SourceError::NotFound(id.clone()))?;

        Ok(FeedSnapshot {
            subscription_id: id.clone(),
            normalization_scheme: scheme.cloned().or_else(|| self.default_scheme.clone()),
            values,
        })
    }
}

// =============================================================================
// Simulated Data
// =============================================================================

/// Parse `scheme,value,field,number` rows into feeds, in first-seen order.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for a row with the wrong column count,
/// an empty id part, or a non-numeric value.
pub fn parse_simulated_data(text: &str) -> Result<Vec<(SubscriptionId, WireMessage)>, ConfigError> {
    let mut feeds: Vec<(SubscriptionId, WireMessage)> = Vec::new();
    let mut index: HashMap<SubscriptionId, usize> = HashMap::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let invalid = |reason: String| ConfigError::Invalid {
            key: format!("simulated data line {}", line_no + 1),
            reason,
        };

        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        let [scheme, value, field, number] = columns.as_slice() else {
            return Err(invalid(format!("expected 4 columns, found {}", columns.len())));
        };

        let id = SubscriptionId::new(*scheme, *value).map_err(|e| invalid(e.to_string()))?;
        let number =
            Decimal::from_str(number).map_err(|e| invalid(format!("`{number}`: {e}")))?;

        let slot = *index.entry(id.clone()).or_insert_with(|| {
            feeds.push((id, WireMessage::new()));
            feeds.len() - 1
        });
        feeds[slot].1.set(field, number);
    }

    Ok(feeds)
}

/// Read and parse a simulated data file.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the file cannot be read or parsed.
pub fn load_simulated_data(path: &Path) -> Result<Vec<(SubscriptionId, WireMessage)>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
        key: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_simulated_data(&text)
}

/// Built-in feeds used when no data file is configured.
#[must_use]
pub fn built_in_data() -> Vec<(SubscriptionId, WireMessage)> {
    const ROWS: &str = "\
OG_SYNTHETIC_TICKER,AAPL,bid,187.42
OG_SYNTHETIC_TICKER,AAPL,ask,187.46
OG_SYNTHETIC_TICKER,AAPL,last,187.44
OG_SYNTHETIC_TICKER,MSFT,bid,411.10
OG_SYNTHETIC_TICKER,MSFT,ask,411.16
OG_SYNTHETIC_TICKER,MSFT,last,411.12
OG_SYNTHETIC_TICKER,USDJPY,Market_Value,151.235
OG_SYNTHETIC_TICKER,EURUSD,Market_Value,1.08415
OG_SYNTHETIC_TICKER,USD_SWAP_5Y,Market_Value,0.04125
";
    parse_simulated_data(ROWS).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broadcast::BroadcastConfig;
    use crate::infrastructure::wire::FieldValue;

    fn id(value: &str) -> SubscriptionId {
        SubscriptionId::new(SYNTHETIC_TICKER_SCHEME, value).unwrap()
    }

    fn source() -> (Arc<BroadcastHub>, InMemoryLiveDataSource) {
        let hub = Arc::new(BroadcastHub::new(BroadcastConfig::default()));
        let source = InMemoryLiveDataSource::new(Arc::clone(&hub), None);
        (hub, source)
    }

    #[tokio::test]
    async fn resolve_known_feed() {
        let (_hub, source) = source();
        source.register(id("AAPL"), WireMessage::new().with("bid", 1.0));

        let scheme = NormalizationScheme::new("scheme").unwrap();
        let snapshot = source.resolve(&id("AAPL"), Some(&scheme)).await.unwrap();

        assert_eq!(snapshot.subscription_id, id("AAPL"));
        assert_eq!(snapshot.normalization_scheme, Some(scheme));
        assert_eq!(snapshot.values.len(), 1);
    }

    #[tokio::test]
    async fn resolve_uses_default_scheme() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let default = NormalizationScheme::new("basic").unwrap();
        let source = InMemoryLiveDataSource::new(hub, Some(default.clone()));
        source.register(id("AAPL"), WireMessage::new());

        let snapshot = source.resolve(&id("AAPL"), None).await.unwrap();
        assert_eq!(snapshot.normalization_scheme, Some(default));
    }

    #[tokio::test]
    async fn resolve_unknown_feed_is_not_found() {
        let (_hub, source) = source();
        let err = source.resolve(&id("NOPE"), None).await.unwrap_err();
        assert_eq!(err, SourceError::NotFound(id("NOPE")));
    }

    #[tokio::test]
    async fn publish_merges_and_broadcasts_changes_only() {
        let (hub, source) = source();
        let mut rx = hub.updates_rx();
        source.register(id("AAPL"), WireMessage::new().with("bid", 1.0).with("ask", 2.0));

        let delivered = source
            .publish(&id("AAPL"), WireMessage::new().with("ask", 2.5))
            .unwrap();
        assert_eq!(delivered, 1);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.changes.len(), 1);

        let values = source.values(&id("AAPL")).unwrap();
        assert_eq!(values.get("ask").and_then(FieldValue::as_f64), Some(2.5));
        assert_eq!(values.get("bid").and_then(FieldValue::as_f64), Some(1.0));
    }

    #[test]
    fn publish_unknown_feed_fails() {
        let (_hub, source) = source();
        assert!(source.publish(&id("NOPE"), WireMessage::new()).is_err());
    }

    #[test]
    fn csv_groups_rows_by_feed() {
        let feeds = parse_simulated_data(
            "# comment\nT,A,bid,1.50\n\nT,B,bid,2\nT,A,ask,1.55\n",
        )
        .unwrap();

        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].0, SubscriptionId::new("T", "A").unwrap());
        assert_eq!(feeds[0].1.len(), 2);
        assert_eq!(
            feeds[0].1.get("ask").and_then(FieldValue::as_decimal),
            Some(Decimal::from_str("1.55").unwrap())
        );
    }

    #[test]
    fn csv_rejects_bad_rows() {
        assert!(matches!(
            parse_simulated_data("T,A,bid"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse_simulated_data("T,A,bid,abc"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse_simulated_data(",A,bid,1"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn missing_file_is_invalid() {
        let err = load_simulated_data(Path::new("/nonexistent/cogda.csv")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn built_in_data_is_not_empty() {
        let feeds = built_in_data();
        assert!(feeds.len() >= 5);
        assert!(feeds.iter().all(|(id, _)| id.scheme() == SYNTHETIC_TICKER_SCHEME));
    }
}
