//! Cogda WebSocket Client
//!
//! Pipelining client for the Cogda live data protocol. Requests are issued
//! without waiting for earlier ones; each carries a fresh correlation id
//! and its response is matched by id, never by arrival order.
//!
//! # Connection Task
//!
//! After the handshake, one task owns the socket and `select!`s over:
//! - cancellation (explicit `close` or client drop)
//! - heartbeat ticks (ping, or drop the connection on pong timeout)
//! - the outbound request queue
//! - inbound frames (responses complete pending slots, updates go to the
//!   update channel)
//!
//! The task never waits on the update consumer. When the update channel is
//! full the update is dropped and counted, so responses and heartbeats keep
//! flowing.
//!
//! When the task ends for any reason every pending request fails with
//! [`ClientError::ConnectionLost`].

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::domain::identifiers::{CorrelationId, NormalizationScheme, SubscriptionId};
use crate::domain::results::ConnectionResult;
use crate::infrastructure::wire::{MsgPackCodec, WireContext, WireError, WireMessage};

use super::adapter::{decode_message, encode_message};
use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::messages::{
    CogdaMessage, CommandResponse, ConnectionRequest, ConnectionResponse, FeedRequest,
    LiveDataUpdate, SnapshotResponse, SubscriptionResponse,
};
use super::pending::{PendingRequests, ResponseHandle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors surfaced to client callers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Local encode or decode failure.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The server rejected the credentials.
    #[error("connection not authorized")]
    NotAuthorized,

    /// The server redirected the client elsewhere.
    #[error("redirected to {available_servers:?}")]
    Redirected {
        /// Alternate servers, in preference order.
        available_servers: Vec<String>,
    },

    /// The handshake did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No response within the request deadline.
    #[error("request {0} timed out")]
    Timeout(CorrelationId),

    /// The connection dropped before the response arrived.
    #[error("connection lost")]
    ConnectionLost,

    /// A response of the wrong kind was matched to a request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`CogdaClient::connect`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://localhost:11876`.
    pub url: String,
    /// User name sent in the handshake.
    pub user_name: String,
    /// Password sent in the handshake.
    pub password: Option<String>,
    /// Proposed capabilities.
    pub capabilities: WireMessage,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Deadline for the connection response.
    pub handshake_timeout: Duration,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
    /// Codec limits.
    pub wire: WireContext,
    /// Buffered updates; further updates are dropped until the consumer
    /// catches up.
    pub updates_capacity: usize,
    /// Buffered outbound requests.
    pub outbound_capacity: usize,
}

impl ClientConfig {
    /// Create a configuration with default timing.
    #[must_use]
    pub fn new(url: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_name: user_name.into(),
            password: None,
            capabilities: WireMessage::new(),
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
            wire: WireContext::default(),
            updates_capacity: 1024,
            outbound_capacity: 256,
        }
    }

    /// Set the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the proposed capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: WireMessage) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the per-request deadline.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the update buffer size.
    #[must_use]
    pub const fn with_updates_capacity(mut self, capacity: usize) -> Self {
        self.updates_capacity = capacity;
        self
    }

    /// Set heartbeat timing.
    #[must_use]
    pub const fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Client
// =============================================================================

/// Connected, established Cogda client.
pub struct CogdaClient {
    outbound_tx: mpsc::Sender<CogdaMessage>,
    pending: Arc<PendingRequests>,
    next_correlation: AtomicI64,
    dropped_updates: Arc<AtomicU64>,
    capabilities: WireMessage,
    request_timeout: Duration,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CogdaClient {
    /// Connect, run the handshake, and start the connection task.
    ///
    /// Returns the client and the receiver of push updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened, the handshake is
    /// rejected or redirected, or no valid connection response arrives in
    /// time.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<LiveDataUpdate>), ClientError> {
        tracing::info!(url = %config.url, user = %config.user_name, "Connecting to Cogda server");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&config.url).await?;
        let (mut write, mut read) = ws_stream.split();
        let codec = MsgPackCodec::new();

        let mut request = ConnectionRequest::builder()
            .user_name(config.user_name.clone())
            .capabilities(config.capabilities.clone());
        if let Some(password) = &config.password {
            request = request.password(password.clone());
        }
        let request = request.build().map_err(WireError::from)?;

        send_message(
            &mut write,
            &codec,
            &config.wire,
            &CogdaMessage::ConnectionRequest(request),
        )
        .await?;

        let response = tokio::time::timeout(
            config.handshake_timeout,
            read_connection_response(&mut read, &mut write, &codec, &config.wire),
        )
        .await
        .map_err(|_| ClientError::HandshakeFailed("no connection response".to_string()))??;

        match response.result() {
            ConnectionResult::NewConnectionSuccess | ConnectionResult::ExistingConnectionRestart => {
            }
            ConnectionResult::NotAuthorized => return Err(ClientError::NotAuthorized),
            ConnectionResult::Redirected => {
                return Err(ClientError::Redirected {
                    available_servers: response.available_servers().to_vec(),
                });
            }
        }

        tracing::info!(
            result = %response.result(),
            capabilities = %response.capabilities().to_json(),
            "Cogda session established"
        );

        let pending = Arc::new(PendingRequests::new());
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (update_tx, update_rx) = mpsc::channel(config.updates_capacity.max(1));
        let dropped_updates = Arc::new(AtomicU64::new(0));

        let connection = ConnectionTask {
            write,
            read,
            codec,
            wire: config.wire,
            heartbeat: Heartbeat::new(config.heartbeat),
            outbound_rx,
            update_tx,
            dropped_updates: Arc::clone(&dropped_updates),
            pending: Arc::clone(&pending),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(connection.run());

        let client = Self {
            outbound_tx,
            pending,
            next_correlation: AtomicI64::new(1),
            dropped_updates,
            capabilities: response.capabilities().clone(),
            request_timeout: config.request_timeout,
            cancel,
            task: parking_lot::Mutex::new(Some(task)),
        };
        Ok((client, update_rx))
    }

    /// Capabilities the server settled on.
    #[must_use]
    pub const fn capabilities(&self) -> &WireMessage {
        &self.capabilities
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.pending.is_closed()
    }

    /// Updates dropped because the update receiver was full.
    #[must_use]
    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates.load(Ordering::Relaxed)
    }

    /// Requests still awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId::new(self.next_correlation.fetch_add(1, Ordering::Relaxed))
    }

    /// Send a subscribe without waiting for its response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] if the connection is down.
    pub async fn issue_subscribe(
        &self,
        id: SubscriptionId,
        scheme: Option<NormalizationScheme>,
    ) -> Result<ResponseHandle, ClientError> {
        self.issue(id, scheme, CogdaMessage::SubscriptionRequest)
            .await
    }

    /// Send a snapshot request without waiting for its response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] if the connection is down.
    pub async fn issue_snapshot(
        &self,
        id: SubscriptionId,
        scheme: Option<NormalizationScheme>,
    ) -> Result<ResponseHandle, ClientError> {
        self.issue(id, scheme, CogdaMessage::SnapshotRequest).await
    }

    async fn issue(
        &self,
        id: SubscriptionId,
        scheme: Option<NormalizationScheme>,
        wrap: fn(FeedRequest) -> CogdaMessage,
    ) -> Result<ResponseHandle, ClientError> {
        let correlation_id = self.next_correlation_id();
        let rx = self.pending.register(correlation_id)?;

        let mut request = FeedRequest::new(id).with_correlation_id(correlation_id);
        if let Some(scheme) = scheme {
            request = request.with_normalization_scheme(scheme);
        }

        if self.outbound_tx.send(wrap(request)).await.is_err() {
            self.pending.cancel(correlation_id);
            return Err(ClientError::ConnectionLost);
        }

        Ok(ResponseHandle::new(
            correlation_id,
            rx,
            self.request_timeout,
            Arc::clone(&self.pending),
        ))
    }

    /// Subscribe and wait for the response.
    ///
    /// A failed subscription is a successful call whose response carries a
    /// non-success generic result.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or connection loss.
    pub async fn subscribe(
        &self,
        id: SubscriptionId,
        scheme: Option<NormalizationScheme>,
    ) -> Result<SubscriptionResponse, ClientError> {
        match self.issue_subscribe(id, scheme).await?.wait().await? {
            CommandResponse::Subscription(response) => Ok(response),
            other => Err(ClientError::UnexpectedResponse(other.message_type().as_str())),
        }
    }

    /// Request a snapshot and wait for the response.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or connection loss.
    pub async fn snapshot(
        &self,
        id: SubscriptionId,
        scheme: Option<NormalizationScheme>,
    ) -> Result<SnapshotResponse, ClientError> {
        match self.issue_snapshot(id, scheme).await?.wait().await? {
            CommandResponse::Snapshot(response) => Ok(response),
            other => Err(ClientError::UnexpectedResponse(other.message_type().as_str())),
        }
    }

    /// Stop a subscription. No response is sent by the server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] if the connection is down.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ClientError> {
        if self.pending.is_closed() {
            return Err(ClientError::ConnectionLost);
        }
        self.outbound_tx
            .send(CogdaMessage::Unsubscribe(FeedRequest::new(id)))
            .await
            .map_err(|_| ClientError::ConnectionLost)
    }

    /// Close the connection and wait for the connection task to finish.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for CogdaClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct ConnectionTask {
    write: WsWrite,
    read: WsRead,
    codec: MsgPackCodec,
    wire: WireContext,
    heartbeat: Heartbeat,
    outbound_rx: mpsc::Receiver<CogdaMessage>,
    update_tx: mpsc::Sender<LiveDataUpdate>,
    dropped_updates: Arc<AtomicU64>,
    pending: Arc<PendingRequests>,
    cancel: CancellationToken,
}

impl ConnectionTask {
    async fn run(mut self) {
        if let Err(e) = self.process().await {
            tracing::warn!(error = %e, "Cogda connection error");
        }

        let failed = self.pending.fail_all();
        if failed > 0 {
            tracing::info!(failed, "Failed pending requests after disconnect");
        }
    }

    async fn process(&mut self) -> Result<(), ClientError> {
        let mut ticks = self.heartbeat.interval();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Closing Cogda connection");
                    let _ = self.write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ticks.tick() => {
                    match self.heartbeat.on_tick() {
                        HeartbeatAction::SendPing => {
                            self.write.send(Message::Ping(vec![].into())).await?;
                        }
                        HeartbeatAction::Expired { .. } => {
                            return Err(ClientError::ConnectionLost);
                        }
                    }
                }
                outbound = self.outbound_rx.recv() => {
                    let Some(message) = outbound else {
                        return Ok(());
                    };
                    send_message(&mut self.write, &self.codec, &self.wire, &message).await?;
                }
                frame = self.read.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => {
                            self.heartbeat.record_pong();
                            self.handle_frame(&data);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Server sent close frame");
                            return Err(ClientError::ConnectionLost);
                        }
                        Some(Ok(_)) => {
                            // Text frames are not part of the protocol
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(ClientError::ConnectionLost);
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, data: &[u8]) {
        let message = match decode_message(&self.codec, &self.wire, data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        match message {
            CogdaMessage::SubscriptionResponse(response) => {
                self.complete(CommandResponse::Subscription(response));
            }
            CogdaMessage::SnapshotResponse(response) => {
                self.complete(CommandResponse::Snapshot(response));
            }
            CogdaMessage::LiveDataUpdate(update) => self.deliver(update),
            other => {
                tracing::warn!(
                    message_type = %other.message_type(),
                    "Unexpected message from server"
                );
            }
        }
    }

    fn deliver(&self, update: LiveDataUpdate) {
        match self.update_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                let dropped = self.dropped_updates.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    subscription_id = %update.subscription_id(),
                    dropped,
                    "Update receiver full, dropping update"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Update receiver dropped");
            }
        }
    }

    fn complete(&self, response: CommandResponse) {
        let Some(correlation_id) = response.fields().correlation_id() else {
            tracing::warn!(
                subscription_id = %response.fields().subscription_id(),
                "Response without correlation id"
            );
            return;
        };
        self.pending.complete(correlation_id, response);
    }
}

// =============================================================================
// Framing
// =============================================================================

async fn send_message(
    write: &mut WsWrite,
    codec: &MsgPackCodec,
    wire: &WireContext,
    message: &CogdaMessage,
) -> Result<(), ClientError> {
    let bytes = encode_message(codec, wire, message)?;
    write.send(Message::Binary(bytes.into())).await?;
    Ok(())
}

async fn read_connection_response(
    read: &mut WsRead,
    write: &mut WsWrite,
    codec: &MsgPackCodec,
    wire: &WireContext,
) -> Result<ConnectionResponse, ClientError> {
    while let Some(frame) = read.next().await {
        match frame? {
            Message::Binary(data) => {
                return match decode_message(codec, wire, &data)? {
                    CogdaMessage::ConnectionResponse(response) => Ok(response),
                    other => Err(ClientError::UnexpectedResponse(
                        other.message_type().as_str(),
                    )),
                };
            }
            Message::Ping(data) => write.send(Message::Pong(data)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(ClientError::HandshakeFailed(
        "connection closed during handshake".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new("ws://localhost:11876", "alice");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.password.is_none());
        assert!(config.capabilities.is_empty());
    }

    #[test]
    fn config_debug_redacts_password() {
        let config = ClientConfig::new("ws://x", "alice").with_password("hunter2");
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = CogdaClient::connect(ClientConfig::new(format!("ws://{addr}"), "alice")).await;
        assert!(matches!(result, Err(ClientError::WebSocket(_))));
    }
}
