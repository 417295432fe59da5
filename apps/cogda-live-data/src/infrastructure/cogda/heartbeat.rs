//! Heartbeat
//!
//! Ping/pong liveness tracking for one WebSocket connection. The owning
//! connection loop drives it from its own `select!`: every interval tick
//! either asks for a ping to be sent or reports that the peer has been
//! silent past the pong deadline.

use std::time::{Duration, Instant};

use tokio::time::{Interval, MissedTickBehavior};

use crate::infrastructure::config::HeartbeatSettings;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// How long an unanswered ping may wait before the peer is dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `HeartbeatSettings`.
    #[must_use]
    pub const fn from_settings(settings: &HeartbeatSettings) -> Self {
        Self {
            ping_interval: settings.interval,
            pong_timeout: settings.timeout,
        }
    }
}

/// What the connection loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping.
    SendPing,
    /// The peer missed the pong deadline; drop the connection.
    Expired {
        /// Time since the last pong.
        silent_for: Duration,
    },
}

/// Liveness state owned by a single connection loop.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_pong: Instant,
    awaiting_pong: bool,
}

impl Heartbeat {
    /// Start tracking from now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_pong: Instant::now(),
            awaiting_pong: false,
        }
    }

    /// Tick source for the connection loop. The first tick is one interval
    /// from now, and missed ticks are skipped.
    #[must_use]
    pub fn interval(&self) -> Interval {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }

    /// Record a pong (or any other proof of life).
    pub fn record_pong(&mut self) {
        self.last_pong = Instant::now();
        self.awaiting_pong = false;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    /// Time since the last pong.
    #[must_use]
    pub fn time_since_pong(&self) -> Duration {
        self.last_pong.elapsed()
    }

    /// Decide what to do on an interval tick.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        if self.awaiting_pong {
            let silent_for = self.time_since_pong();
            if silent_for > self.config.pong_timeout {
                tracing::warn!(
                    elapsed_secs = silent_for.as_secs(),
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Heartbeat timeout detected"
                );
                return HeartbeatAction::Expired { silent_for };
            }
        }

        self.awaiting_pong = true;
        HeartbeatAction::SendPing
    }

    #[cfg(test)]
    fn backdate_pong(&mut self, by: Duration) {
        if let Some(earlier) = Instant::now().checked_sub(by) {
            self.last_pong = earlier;
        }
    }
}
