//! Simulated Ticker
//!
//! Random-walk driver for the in-memory source. After a random delay it
//! picks one feed that somebody is subscribed to and nudges each numeric
//! field by up to `±scaling_factor` of its value.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::domain::identifiers::SubscriptionId;
use crate::domain::subscription::FeedRegistry;
use crate::infrastructure::config::SimulationSettings;
use crate::infrastructure::wire::{FieldValue, WireMessage};

use super::InMemoryLiveDataSource;

/// Ticker timing and step size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerConfig {
    /// Upper bound of the random delay between ticks.
    pub max_millis_between_ticks: u64,
    /// Maximum relative change per tick.
    pub scaling_factor: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            max_millis_between_ticks: 1000,
            scaling_factor: 0.005,
            seed: None,
        }
    }
}

impl From<&SimulationSettings> for TickerConfig {
    fn from(settings: &SimulationSettings) -> Self {
        Self {
            max_millis_between_ticks: settings.max_millis_between_ticks,
            scaling_factor: settings.scaling_factor,
            seed: settings.seed,
        }
    }
}

/// Background task publishing random changes to active feeds.
pub struct SimulatedTicker {
    source: Arc<InMemoryLiveDataSource>,
    registry: Arc<FeedRegistry>,
    config: TickerConfig,
    rng: StdRng,
    cancel: CancellationToken,
}

impl SimulatedTicker {
    /// Create a ticker.
    #[must_use]
    pub fn new(
        source: Arc<InMemoryLiveDataSource>,
        registry: Arc<FeedRegistry>,
        config: TickerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            source,
            registry,
            config,
            rng,
            cancel,
        }
    }

    /// Tick until cancelled.
    pub async fn run(mut self) {
        tracing::info!(
            max_millis_between_ticks = self.config.max_millis_between_ticks,
            scaling_factor = self.config.scaling_factor,
            "Simulated ticker started"
        );

        loop {
            let delay = Duration::from_millis(
                self.rng
                    .random_range(0..=self.config.max_millis_between_ticks),
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Simulated ticker cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {
                    self.tick();
                }
            }
        }
    }

    /// Publish one random change. Returns the feed that ticked, if any.
    pub fn tick(&mut self) -> Option<SubscriptionId> {
        let mut active = self.registry.active_feeds();
        if active.is_empty() {
            return None;
        }
        active.sort();

        let id = active.swap_remove(self.rng.random_range(0..active.len()));
        let values = self.source.values(&id)?;
        let changes = self.perturb(&values);
        if changes.is_empty() {
            return None;
        }

        match self.source.publish(&id, changes) {
            Ok(_) => Some(id),
            Err(e) => {
                tracing::debug!(subscription_id = %id, error = %e, "Tick for unknown feed");
                None
            }
        }
    }

    fn perturb(&mut self, values: &WireMessage) -> WireMessage {
        let scaling = self.config.scaling_factor;
        let bound = if scaling.is_finite() { scaling.abs() } else { 0.0 };
        let mut changes = WireMessage::new();

        for field in values.fields() {
            let factor = 1.0 + self.rng.random_range(-bound..=bound);
            match field.value() {
                FieldValue::Float(current) => changes.add(field.name(), current * factor),
                FieldValue::Decimal(current) => {
                    if let Some(next) = scale_decimal(*current, factor) {
                        changes.add(field.name(), next);
                    }
                }
                _ => {}
            }
        }

        changes
    }
}

fn scale_decimal(current: Decimal, factor: f64) -> Option<Decimal> {
    let factor = Decimal::try_from(factor).ok()?;
    let next = current.checked_mul(factor)?;
    Some(next.round_dp(current.scale()))
}
