//! Configuration Module
//!
//! Configuration loading for the Cogda server.

mod settings;

pub use settings::{
    AccessSettings, BroadcastSettings, ConfigError, ConnectionSettings, HeartbeatSettings,
    ServerConfig, ServerSettings, SimulationSettings, UserCredential, WireSettings,
};
