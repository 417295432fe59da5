//! Cogda Live Data Server Binary
//!
//! Starts the Cogda protocol server backed by simulated live data.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin cogda-server
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `COGDA_USERS`: `user[:password]` comma list
//!
//! ## Optional
//! - `COGDA_LISTEN_PORT`: Protocol WebSocket port (default: 11876)
//! - `COGDA_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `COGDA_MAX_CONNECTIONS` / `COGDA_REDIRECT_SERVERS`: Redirect when full
//! - `COGDA_SIMULATED_DATA`: CSV file of `scheme,value,field,number` rows
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_SERVICE_NAME`: Service name (default: cogda-live-data)
//! - `RUST_LOG`: Log filter (default: cogda_live_data=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cogda_live_data::infrastructure::cogda::{
    CogdaServer, SchemeEntitlements, ServerOptions, ServerPorts, UserDirectory,
};
use cogda_live_data::infrastructure::health::{HealthServer, HealthServerState};
use cogda_live_data::infrastructure::source::{
    InMemoryLiveDataSource, SimulatedTicker, TickerConfig, built_in_data, load_simulated_data,
};
use cogda_live_data::infrastructure::telemetry;
use cogda_live_data::{
    BroadcastConfig, BroadcastHub, FeedRegistry, LiveDataSource, ServerConfig, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for connections to close after shutdown starts.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Cogda live data server");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ServerConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Feed updates fan out from the source to every connection
    let hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));
    let registry = Arc::new(FeedRegistry::new());

    let source = Arc::new(InMemoryLiveDataSource::new(
        Arc::clone(&hub),
        config.access.default_normalization.clone(),
    ));
    let feeds = match &config.simulation.data_file {
        Some(path) => load_simulated_data(path).context("invalid simulated data")?,
        None => built_in_data(),
    };
    source.register_all(feeds);
    tracing::info!(feeds = source.len(), "Simulated feeds loaded");

    let users = config
        .access
        .users
        .iter()
        .fold(UserDirectory::new(), |users, user| {
            users.with_user(user.name(), user.password().map(str::to_string))
        });

    let ports = ServerPorts {
        source: Arc::clone(&source) as Arc<dyn LiveDataSource>,
        authenticator: Arc::new(users),
        entitlements: Arc::new(SchemeEntitlements::for_schemes(
            config.access.entitled_schemes.clone(),
        )),
    };

    let server = Arc::new(CogdaServer::new(
        ServerOptions::from_config(&config),
        ports,
        Arc::clone(&registry),
        Arc::clone(&hub),
        shutdown_token.clone(),
    ));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.connections.max_connections,
        server.status(),
        Arc::clone(&registry),
        Arc::clone(&hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let ticker = SimulatedTicker::new(
        source,
        Arc::clone(&registry),
        TickerConfig::from(&config.simulation),
        shutdown_token.clone(),
    );

    // Spawn health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn simulated ticker
    tokio::spawn(ticker.run());

    // Spawn protocol server
    let listener = CogdaServer::bind(config.server.listen_port).await?;
    let serve = tokio::spawn(Arc::clone(&server).serve(listener));

    tracing::info!("Cogda server ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, serve).await.is_err() {
        tracing::warn!("Listener did not stop in time");
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    tracing::info!(
        open_connections = server.status().open_connections(),
        "Cogda server stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        listen_port = config.server.listen_port,
        health_port = config.server.health_port,
        users = config.access.users.len(),
        max_connections = config.connections.max_connections,
        redirect_servers = config.connections.redirect_servers.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_secs = config.heartbeat.interval.as_secs(),
        heartbeat_timeout_secs = config.heartbeat.timeout.as_secs(),
        max_message_bytes = config.wire.max_message_bytes,
        max_depth = config.wire.max_depth,
        "Connection limits"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
