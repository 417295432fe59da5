//! Server Configuration Settings
//!
//! Configuration types for the Cogda server, loaded from environment
//! variables. Every variable except `COGDA_USERS` has a default.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::identifiers::NormalizationScheme;
use crate::infrastructure::wire::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_MESSAGE_BYTES, WireContext};

/// A configured user.
#[derive(Clone, PartialEq, Eq)]
pub struct UserCredential {
    name: String,
    password: Option<String>,
}

impl UserCredential {
    /// Create a user entry.
    #[must_use]
    pub const fn new(name: String, password: Option<String>) -> Self {
        Self { name, password }
    }

    /// User name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Password, if one is required.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl std::fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredential")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Listener port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Cogda protocol WebSocket port.
    pub listen_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_port: 11876,
            health_port: 8083,
        }
    }
}

/// Per-connection limits and load balancing.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Established sessions before redirecting (0 = unlimited).
    pub max_connections: usize,
    /// Alternate servers offered on redirect.
    pub redirect_servers: Vec<String>,
    /// Outbound frames buffered per connection.
    pub outbound_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_connections: 0,
            redirect_servers: Vec::new(),
            outbound_capacity: 1024,
        }
    }
}

/// Heartbeat settings.
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    /// Ping interval.
    pub interval: Duration,
    /// Pong deadline before the peer is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Capacity of the feed update channel.
    pub updates_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            updates_capacity: 10_000,
        }
    }
}

/// Codec limits.
#[derive(Debug, Clone)]
pub struct WireSettings {
    /// Maximum encoded message size.
    pub max_message_bytes: usize,
    /// Maximum nesting depth.
    pub max_depth: usize,
}

impl Default for WireSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl WireSettings {
    /// Codec context for these limits.
    #[must_use]
    pub const fn context(&self) -> WireContext {
        WireContext::new(self.max_message_bytes, self.max_depth)
    }
}

/// Authentication, entitlement and negotiation settings.
#[derive(Debug, Clone, Default)]
pub struct AccessSettings {
    /// Configured users.
    pub users: Vec<UserCredential>,
    /// Capability names kept in negotiation (empty = all).
    pub accepted_capabilities: Vec<String>,
    /// Id schemes users may read (empty = all).
    pub entitled_schemes: Vec<String>,
    /// Scheme assigned when a request names none.
    pub default_normalization: Option<NormalizationScheme>,
}

/// Simulated live data settings.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// CSV file of initial feed values.
    pub data_file: Option<PathBuf>,
    /// Upper bound of the random delay between ticks.
    pub max_millis_between_ticks: u64,
    /// Maximum relative change per tick.
    pub scaling_factor: f64,
    /// Fixed RNG seed.
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            data_file: None,
            max_millis_between_ticks: 1000,
            scaling_factor: 0.005,
            seed: None,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Listener ports.
    pub server: ServerSettings,
    /// Connection limits.
    pub connections: ConnectionSettings,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatSettings,
    /// Broadcast channel.
    pub broadcast: BroadcastSettings,
    /// Codec limits.
    pub wire: WireSettings,
    /// Access control.
    pub access: AccessSettings,
    /// Simulated data.
    pub simulation: SimulationSettings,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `COGDA_USERS` is missing, empty or malformed,
    /// `COGDA_DEFAULT_NORMALIZATION` is empty, or `COGDA_SCALING_FACTOR` is
    /// not finite.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let users_raw =
            lookup("COGDA_USERS").ok_or_else(|| ConfigError::MissingEnvVar("COGDA_USERS".into()))?;
        let users = parse_users(&users_raw)?;

        let default_normalization = lookup("COGDA_DEFAULT_NORMALIZATION")
            .map(|name| {
                NormalizationScheme::new(name.trim()).map_err(|_| {
                    ConfigError::EmptyValue("COGDA_DEFAULT_NORMALIZATION".to_string())
                })
            })
            .transpose()?;

        let server = ServerSettings {
            listen_port: parse_env_u16(
                &lookup,
                "COGDA_LISTEN_PORT",
                ServerSettings::default().listen_port,
            ),
            health_port: parse_env_u16(
                &lookup,
                "COGDA_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let connections = ConnectionSettings {
            max_connections: parse_env_usize(
                &lookup,
                "COGDA_MAX_CONNECTIONS",
                ConnectionSettings::default().max_connections,
            ),
            redirect_servers: parse_env_list(&lookup, "COGDA_REDIRECT_SERVERS"),
            outbound_capacity: parse_env_usize(
                &lookup,
                "COGDA_OUTBOUND_CAPACITY",
                ConnectionSettings::default().outbound_capacity,
            ),
        };

        let heartbeat = HeartbeatSettings {
            interval: parse_env_duration_secs(
                &lookup,
                "COGDA_HEARTBEAT_INTERVAL_SECS",
                HeartbeatSettings::default().interval,
            ),
            timeout: parse_env_duration_secs(
                &lookup,
                "COGDA_HEARTBEAT_TIMEOUT_SECS",
                HeartbeatSettings::default().timeout,
            ),
        };

        let broadcast = BroadcastSettings {
            updates_capacity: parse_env_usize(
                &lookup,
                "COGDA_UPDATES_CAPACITY",
                BroadcastSettings::default().updates_capacity,
            ),
        };

        let wire = WireSettings {
            max_message_bytes: parse_env_usize(
                &lookup,
                "COGDA_MAX_MESSAGE_BYTES",
                WireSettings::default().max_message_bytes,
            ),
            max_depth: parse_env_usize(
                &lookup,
                "COGDA_MAX_MESSAGE_DEPTH",
                WireSettings::default().max_depth,
            ),
        };

        let access = AccessSettings {
            users,
            accepted_capabilities: parse_env_list(&lookup, "COGDA_ACCEPTED_CAPABILITIES"),
            entitled_schemes: parse_env_list(&lookup, "COGDA_ENTITLED_SCHEMES"),
            default_normalization,
        };

        let simulation = SimulationSettings {
            data_file: lookup("COGDA_SIMULATED_DATA")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            max_millis_between_ticks: parse_env_u64(
                &lookup,
                "COGDA_MAX_MILLIS_BETWEEN_TICKS",
                SimulationSettings::default().max_millis_between_ticks,
            ),
            scaling_factor: parse_env_finite_f64(
                &lookup,
                "COGDA_SCALING_FACTOR",
                SimulationSettings::default().scaling_factor,
            )?,
            seed: lookup("COGDA_TICKER_SEED").and_then(|v| v.trim().parse().ok()),
        };

        Ok(Self {
            server,
            connections,
            heartbeat,
            broadcast,
            wire,
            access,
            simulation,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A value could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Variable or file the value came from.
        key: String,
        /// What was wrong.
        reason: String,
    },
}

/// Parse a `user[:password]` comma list.
fn parse_users(raw: &str) -> Result<Vec<UserCredential>, ConfigError> {
    let mut users = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, password) = match entry.split_once(':') {
            Some((name, password)) => (name.trim(), Some(password.to_string())),
            None => (entry, None),
        };
        if name.is_empty() {
            return Err(ConfigError::Invalid {
                key: "COGDA_USERS".to_string(),
                reason: format!("entry `{entry}` has no user name"),
            });
        }
        users.push(UserCredential::new(name.to_string(), password));
    }

    if users.is_empty() {
        return Err(ConfigError::EmptyValue("COGDA_USERS".to_string()));
    }
    Ok(users)
}

fn parse_env_list<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Vec<String> {
    lookup(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_env_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u64) -> u64 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Like the other numeric parsers, but `NaN` and infinities are errors.
fn parse_env_finite_f64<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: f64,
) -> Result<f64, ConfigError> {
    match lookup(key).and_then(|v| v.trim().parse::<f64>().ok()) {
        Some(value) if !value.is_finite() => Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: format!("`{value}` is not a finite number"),
        }),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

fn parse_env_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
