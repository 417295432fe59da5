//! Cogda WebSocket Server
//!
//! Accepts WebSocket connections and speaks the Cogda protocol on each.
//!
//! # Connection Lifecycle
//!
//! 1. The first binary frame must be a connection request. The handshake
//!    answer is written directly; rejected and redirected sessions are
//!    closed right after it.
//! 2. Once established, subscribe and snapshot requests are handled on
//!    their own tasks so a slow resolution never blocks later requests.
//!    Responses and push updates share one outbound queue drained by the
//!    connection loop.
//! 3. On close, outstanding handlers are aborted, then the connection's
//!    subscriptions are released from the feed registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Authenticator, EntitlementChecker, LiveDataSource};
use crate::application::services::{PushDispatcher, SubscriptionService};
use crate::domain::results::GenericResult;
use crate::domain::subscription::{ConnectionId, FeedRegistry};
use crate::infrastructure::broadcast::BroadcastHub;
use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::wire::{MsgPackCodec, WireContext, WireMessage};

use super::adapter::{decode_message, encode_message};
use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::messages::{
    CogdaMessage, ConnectionRequest, FeedRequest, ResponseFields, SnapshotResponse,
    SubscriptionResponse,
};
use super::session::{
    CapabilityPolicy, ConnectionSession, SessionPolicy, SessionState, handshake_label,
};

type WsWrite = SplitSink<WebSocketStream<TcpStream>, Message>;

// =============================================================================
// Errors
// =============================================================================

/// Errors from running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// WebSocket transport error on a connection.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

// =============================================================================
// Configuration
// =============================================================================

/// Per-connection limits and handshake rules.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Codec limits.
    pub wire: WireContext,
    /// Ping cadence and pong deadline.
    pub heartbeat: HeartbeatConfig,
    /// Outbound queue size per connection.
    pub outbound_capacity: usize,
    /// Handshake rules.
    pub policy: SessionPolicy,
}

impl ServerOptions {
    /// Options from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            wire: config.wire.context(),
            heartbeat: HeartbeatConfig::from_settings(&config.heartbeat),
            outbound_capacity: config.connections.outbound_capacity,
            policy: SessionPolicy {
                capabilities: CapabilityPolicy::new(config.access.accepted_capabilities.clone()),
                max_connections: config.connections.max_connections,
                redirect_servers: config.connections.redirect_servers.clone(),
            },
        }
    }
}

/// Ports the server answers requests through.
#[derive(Clone)]
pub struct ServerPorts {
    /// Feed resolution.
    pub source: Arc<dyn LiveDataSource>,
    /// Credential checks.
    pub authenticator: Arc<dyn Authenticator>,
    /// Per-feed entitlement checks.
    pub entitlements: Arc<dyn EntitlementChecker>,
}

// =============================================================================
// Status
// =============================================================================

/// Live counters read by the health server.
#[derive(Debug, Default)]
pub struct ServerStatus {
    open: AtomicUsize,
    established: AtomicUsize,
    accepting: AtomicBool,
}

impl ServerStatus {
    /// Open WebSocket connections.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    /// Connections with an established session.
    #[must_use]
    pub fn established_sessions(&self) -> usize {
        self.established.load(Ordering::Relaxed)
    }

    /// Whether the listener is accepting connections.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Relaxed)
    }

    fn opened(&self) {
        let open = self.open.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_connections(open);
    }

    fn closed(&self) {
        let open = self.open.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_connections(open);
    }

    /// Count one more session if fewer than `max` exist (`0` is unlimited).
    ///
    /// `Ok` carries the count before the reservation, `Err` the count that
    /// blocked it.
    fn reserve_session(&self, max: usize) -> Result<usize, usize> {
        self.established
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
    }

    fn admit_session(&self) {
        self.established.fetch_add(1, Ordering::AcqRel);
    }

    fn release_session(&self) {
        self.established.fetch_sub(1, Ordering::AcqRel);
    }
}

// =============================================================================
// Server
// =============================================================================

/// Cogda protocol server.
pub struct CogdaServer {
    options: ServerOptions,
    ports: ServerPorts,
    registry: Arc<FeedRegistry>,
    hub: Arc<BroadcastHub>,
    status: Arc<ServerStatus>,
    codec: MsgPackCodec,
    cancel: CancellationToken,
}

impl CogdaServer {
    /// Create a server. Cancelling `cancel` stops the listener and closes
    /// every connection.
    #[must_use]
    pub fn new(
        options: ServerOptions,
        ports: ServerPorts,
        registry: Arc<FeedRegistry>,
        hub: Arc<BroadcastHub>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            options,
            ports,
            registry,
            hub,
            status: Arc::new(ServerStatus::default()),
            codec: MsgPackCodec::new(),
            cancel,
        }
    }

    /// Live counters.
    #[must_use]
    pub fn status(&self) -> Arc<ServerStatus> {
        Arc::clone(&self.status)
    }

    /// Bind a listener on all interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the port is unavailable.
    pub async fn bind(port: u16) -> Result<TcpListener, ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Accept connections until cancelled.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Cogda server listening");
        }
        self.status.accepting.store(true, Ordering::Relaxed);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(Arc::clone(&self).handle_connection(stream, peer));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                },
            }
        }

        self.status.accepting.store(false, Ordering::Relaxed);
        tracing::info!("Cogda server stopped accepting");
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let connection_id: ConnectionId = uuid::Uuid::new_v4().as_u64_pair().0;

        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "WebSocket upgrade failed");
                return;
            }
        };

        tracing::info!(connection_id, peer = %peer, "Connection opened");
        self.status.opened();

        let mut connection = Connection::new(Arc::clone(&self), connection_id);
        if let Err(e) = connection.run(ws).await {
            tracing::info!(connection_id, error = %e, "Connection error");
        }
        connection.shutdown().await;

        self.status.closed();
        tracing::info!(connection_id, peer = %peer, "Connection closed");
    }
}

// =============================================================================
// Connection
// =============================================================================

/// What the connection loop does after handling a frame.
enum Flow {
    Continue,
    Close,
}

struct Connection {
    server: Arc<CogdaServer>,
    id: ConnectionId,
    session: ConnectionSession,
    service: Option<Arc<SubscriptionService>>,
    outbound_tx: mpsc::Sender<CogdaMessage>,
    outbound_rx: mpsc::Receiver<CogdaMessage>,
    handlers: JoinSet<()>,
    cancel: CancellationToken,
}

impl Connection {
    fn new(server: Arc<CogdaServer>, id: ConnectionId) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(server.options.outbound_capacity.max(1));
        let cancel = server.cancel.child_token();
        Self {
            server,
            id,
            session: ConnectionSession::new(),
            service: None,
            outbound_tx,
            outbound_rx,
            handlers: JoinSet::new(),
            cancel,
        }
    }

    async fn run(&mut self, ws: WebSocketStream<TcpStream>) -> Result<(), ServerError> {
        let (mut write, mut read) = ws.split();
        let mut heartbeat = Heartbeat::new(self.server.options.heartbeat);
        let mut ticks = heartbeat.interval();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ticks.tick() => {
                    match heartbeat.on_tick() {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(vec![].into())).await?;
                        }
                        HeartbeatAction::Expired { silent_for } => {
                            tracing::info!(
                                connection_id = self.id,
                                silent_ms = silent_for.as_millis(),
                                "Heartbeat timeout"
                            );
                            return Ok(());
                        }
                    }
                }
                Some(message) = self.outbound_rx.recv() => {
                    self.write(&mut write, &message).await?;
                }
                Some(_) = self.handlers.join_next(), if !self.handlers.is_empty() => {}
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat.record_pong();
                            if let Flow::Close = self.handle_frame(&mut write, &data).await? {
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Pong(_))) => heartbeat.record_pong(),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {
                            tracing::debug!(connection_id = self.id, "Ignoring non-binary frame");
                        }
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, write: &mut WsWrite, data: &[u8]) -> Result<Flow, ServerError> {
        let message = match decode_message(&self.server.codec, &self.server.options.wire, data) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_decode_failure();
                tracing::warn!(connection_id = self.id, error = %e, "Dropping undecodable frame");
                return Ok(Flow::Continue);
            }
        };

        match message {
            CogdaMessage::ConnectionRequest(request) => self.handshake(write, &request).await,
            CogdaMessage::SubscriptionRequest(request) => {
                self.subscribe(write, request).await?;
                Ok(Flow::Continue)
            }
            CogdaMessage::SnapshotRequest(request) => {
                self.snapshot(write, request).await?;
                Ok(Flow::Continue)
            }
            CogdaMessage::Unsubscribe(request) => {
                match &self.service {
                    Some(service) => {
                        service.unsubscribe(&request);
                    }
                    None => {
                        tracing::debug!(connection_id = self.id, "Unsubscribe before handshake ignored");
                    }
                }
                Ok(Flow::Continue)
            }
            other => {
                tracing::warn!(
                    connection_id = self.id,
                    message_type = %other.message_type(),
                    "Unexpected message from client"
                );
                Ok(Flow::Continue)
            }
        }
    }

    async fn handshake(
        &mut self,
        write: &mut WsWrite,
        request: &ConnectionRequest,
    ) -> Result<Flow, ServerError> {
        let server = Arc::clone(&self.server);
        // The slot is held across the handshake so concurrent handshakes
        // cannot all pass the limit.
        let reservation = if self.session.state() == SessionState::Unauthenticated {
            server
                .status
                .reserve_session(server.options.policy.max_connections)
        } else {
            Err(server.status.established_sessions())
        };
        let (Ok(established) | Err(established)) = reservation;

        let response = match self
            .session
            .handshake(
                request,
                server.ports.authenticator.as_ref(),
                &server.options.policy,
                established,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if reservation.is_ok() {
                    server.status.release_session();
                }
                tracing::warn!(connection_id = self.id, error = %e, "Repeated connection request ignored");
                return Ok(Flow::Continue);
            }
        };

        let result = response.result();
        metrics::record_handshake(handshake_label(result));
        tracing::info!(
            connection_id = self.id,
            user_name = %request.user_name(),
            result = %result,
            "Handshake"
        );

        if !self.session.state().accepts_requests() {
            if reservation.is_ok() {
                server.status.release_session();
            }
            self.write(write, &CogdaMessage::ConnectionResponse(response))
                .await?;
            return Ok(Flow::Close);
        }

        // Over the limit with no redirect list: established anyway.
        if reservation.is_err() {
            server.status.admit_session();
        }
        let service = Arc::new(SubscriptionService::new(
            self.id,
            request.user_name(),
            Arc::clone(&server.registry),
            Arc::clone(&server.ports.source),
            Arc::clone(&server.ports.entitlements),
        ));

        let dispatcher = PushDispatcher::new(
            self.id,
            service.table(),
            server.hub.updates_rx(),
            self.outbound_tx.clone(),
            self.cancel.clone(),
        );
        tokio::spawn(dispatcher.run());
        self.service = Some(service);

        self.write(write, &CogdaMessage::ConnectionResponse(response))
            .await?;
        Ok(Flow::Continue)
    }

    async fn subscribe(&mut self, write: &mut WsWrite, request: FeedRequest) -> Result<(), ServerError> {
        let Some(service) = self.service.clone() else {
            let response = SubscriptionResponse::new(not_established(&request), WireMessage::new());
            return self
                .write(write, &CogdaMessage::SubscriptionResponse(response))
                .await;
        };

        let outbound = self.outbound_tx.clone();
        self.handlers.spawn(async move {
            let response = service.subscribe(&request).await;
            let _ = outbound
                .send(CogdaMessage::SubscriptionResponse(response))
                .await;
        });
        Ok(())
    }

    async fn snapshot(&mut self, write: &mut WsWrite, request: FeedRequest) -> Result<(), ServerError> {
        let Some(service) = self.service.clone() else {
            let response = SnapshotResponse::new(not_established(&request), WireMessage::new());
            return self
                .write(write, &CogdaMessage::SnapshotResponse(response))
                .await;
        };

        let outbound = self.outbound_tx.clone();
        self.handlers.spawn(async move {
            let response = service.snapshot(&request).await;
            let _ = outbound.send(CogdaMessage::SnapshotResponse(response)).await;
        });
        Ok(())
    }

    /// Encode and send one message. Messages that fail to encode are
    /// logged and skipped.
    async fn write(&self, write: &mut WsWrite, message: &CogdaMessage) -> Result<(), ServerError> {
        match encode_message(&self.server.codec, &self.server.options.wire, message) {
            Ok(bytes) => {
                write.send(Message::Binary(bytes.into())).await?;
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = self.id,
                    message_type = %message.message_type(),
                    error = %e,
                    "Dropping unencodable message"
                );
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.handlers.abort_all();
        while self.handlers.join_next().await.is_some() {}

        if let Some(service) = self.service.take() {
            service.disconnect();
            self.server.status.release_session();
        }
    }
}

fn not_established(request: &FeedRequest) -> ResponseFields {
    ResponseFields::answering(
        request,
        request.subscription_id().clone(),
        request.normalization_scheme().cloned(),
        GenericResult::NotAuthorized,
        Some("session is not established".to_string()),
    )
}
