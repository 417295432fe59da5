//! Cogda Protocol Integration Tests
//!
//! Starts a real server on a random port and drives it with the pipelining
//! client, or with raw WebSocket frames where the exact wire form matters.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use cogda_live_data::infrastructure::cogda::adapter::{decode_message, encode_message};
use cogda_live_data::infrastructure::cogda::messages::fields;
use cogda_live_data::infrastructure::cogda::session::{CapabilityPolicy, SessionPolicy};
use cogda_live_data::infrastructure::cogda::{
    ConnectionRequest, ConnectionResponse, FeedRequest, LiveDataUpdate, ResponseMessage,
    SchemeEntitlements, UserDirectory,
};
use cogda_live_data::infrastructure::wire::{FieldValue, MsgPackCodec, WireContext, WireMessage};
use cogda_live_data::{
    BroadcastHub, ClientConfig, ClientError, CogdaClient, CogdaMessage, CogdaServer,
    ConnectionResult, CorrelationId, FeedRegistry, GenericResult, InMemoryLiveDataSource,
    LiveDataSource, NormalizationScheme, ServerOptions, ServerPorts, SubscriptionId,
};

type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Harness
// =============================================================================

struct TestServer {
    addr: SocketAddr,
    source: Arc<InMemoryLiveDataSource>,
    registry: Arc<FeedRegistry>,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(SessionPolicy::default(), SchemeEntitlements::allow_all()).await
    }

    async fn start_with(policy: SessionPolicy, entitlements: SchemeEntitlements) -> Self {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let registry = Arc::new(FeedRegistry::new());
        let source = Arc::new(InMemoryLiveDataSource::new(Arc::clone(&hub), None));
        source.register(
            id("a", "b"),
            WireMessage::new().with("Market_Value", 1.25).with("bid", 1.2),
        );
        source.register(id("a", "c"), WireMessage::new().with("Market_Value", 7.0));
        source.register(id("restricted", "x"), WireMessage::new().with("Market_Value", 9.0));

        let users = UserDirectory::new()
            .with_user("alice", Some("secret".to_string()))
            .with_user("bob", None);

        let options = ServerOptions {
            wire: WireContext::default(),
            heartbeat: Default::default(),
            outbound_capacity: 64,
            policy,
        };
        let ports = ServerPorts {
            source: Arc::clone(&source) as Arc<dyn LiveDataSource>,
            authenticator: Arc::new(users),
            entitlements: Arc::new(entitlements),
        };

        let cancel = CancellationToken::new();
        let server = Arc::new(CogdaServer::new(
            options,
            ports,
            Arc::clone(&registry),
            hub,
            cancel.clone(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        Self {
            addr,
            source,
            registry,
            cancel,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn connect(&self) -> (CogdaClient, mpsc::Receiver<LiveDataUpdate>) {
        CogdaClient::connect(ClientConfig::new(self.url(), "alice").with_password("secret"))
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn id(scheme: &str, value: &str) -> SubscriptionId {
    SubscriptionId::new(scheme, value).unwrap()
}

fn scheme(name: &str) -> NormalizationScheme {
    NormalizationScheme::new(name).unwrap()
}

/// Poll `check` until it holds or the wait expires.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

// =============================================================================
// Raw Frames
// =============================================================================

async fn raw_connect(addr: SocketAddr) -> RawSocket {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    ws
}

async fn raw_send(ws: &mut RawSocket, message: &CogdaMessage) {
    let bytes = encode_message(&MsgPackCodec::new(), &WireContext::default(), message).unwrap();
    ws.send(Message::Binary(bytes.into())).await.unwrap();
}

/// Next binary frame as raw bytes.
async fn raw_recv_bytes(ws: &mut RawSocket) -> Option<Vec<u8>> {
    timeout(WAIT, async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Binary(data)) => return Some(data.to_vec()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await
    .unwrap()
}

async fn raw_recv(ws: &mut RawSocket) -> CogdaMessage {
    let bytes = raw_recv_bytes(ws).await.expect("expected a binary frame");
    decode_message(&MsgPackCodec::new(), &WireContext::default(), &bytes).unwrap()
}

async fn raw_handshake(ws: &mut RawSocket, user: &str, password: &str) -> ConnectionResponse {
    let request = ConnectionRequest::builder()
        .user_name(user)
        .password(password)
        .build()
        .unwrap();
    raw_send(ws, &CogdaMessage::ConnectionRequest(request)).await;
    match raw_recv(ws).await {
        CogdaMessage::ConnectionResponse(response) => response,
        other => panic!("expected connection response, got {:?}", other.message_type()),
    }
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn valid_credentials_establish_session() {
    let server = TestServer::start().await;
    let mut ws = raw_connect(server.addr).await;

    let response = raw_handshake(&mut ws, "alice", "secret").await;

    assert_eq!(response.result(), ConnectionResult::NewConnectionSuccess);
    assert!(response.available_servers().is_empty());
    assert!(response.capabilities().has_field("serverVersion"));
}

#[tokio::test]
async fn client_connect_negotiates_capabilities() {
    let server = TestServer::start().await;

    let config = ClientConfig::new(server.url(), "bob")
        .with_capabilities(WireMessage::new().with("compression", "none"));
    let (client, _updates) = CogdaClient::connect(config).await.unwrap();

    assert!(client.is_connected());
    assert!(client.capabilities().has_field("compression"));
    assert!(client.capabilities().has_field("serverVersion"));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let server = TestServer::start().await;

    let config = ClientConfig::new(server.url(), "alice").with_password("wrong");
    let result = CogdaClient::connect(config).await;

    assert!(matches!(result, Err(ClientError::NotAuthorized)));
}

#[tokio::test]
async fn rejected_session_echoes_capabilities_and_closes() {
    let server = TestServer::start().await;
    let mut ws = raw_connect(server.addr).await;

    let request = ConnectionRequest::builder()
        .user_name("mallory")
        .capabilities(WireMessage::new().with("proposal", 1_i64))
        .build()
        .unwrap();
    raw_send(&mut ws, &CogdaMessage::ConnectionRequest(request)).await;

    let CogdaMessage::ConnectionResponse(response) = raw_recv(&mut ws).await else {
        panic!("expected connection response");
    };
    assert_eq!(response.result(), ConnectionResult::NotAuthorized);
    assert!(response.capabilities().has_field("proposal"));
    assert!(response.available_servers().is_empty());

    assert!(raw_recv_bytes(&mut ws).await.is_none(), "server should close");
}

#[tokio::test]
async fn full_server_redirects() {
    let policy = SessionPolicy {
        capabilities: CapabilityPolicy::default(),
        max_connections: 1,
        redirect_servers: vec!["ws://backup-1:11876".to_string(), "ws://backup-2:11876".to_string()],
    };
    let server = TestServer::start_with(policy, SchemeEntitlements::allow_all()).await;

    let (_first, _updates) = server.connect().await;
    let second = CogdaClient::connect(ClientConfig::new(server.url(), "bob")).await;

    match second {
        Err(ClientError::Redirected { available_servers }) => {
            assert_eq!(
                available_servers,
                vec!["ws://backup-1:11876".to_string(), "ws://backup-2:11876".to_string()]
            );
        }
        other => panic!("expected redirect, got {:?}", other.err()),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_handshakes_respect_connection_limit() {
    let policy = SessionPolicy {
        capabilities: CapabilityPolicy::default(),
        max_connections: 1,
        redirect_servers: vec!["ws://backup-1:11876".to_string()],
    };
    let server = TestServer::start_with(policy, SchemeEntitlements::allow_all()).await;

    let attempts = (0..8).map(|_| CogdaClient::connect(ClientConfig::new(server.url(), "bob")));
    let results = futures_util::future::join_all(attempts).await;

    let mut established = Vec::new();
    let mut redirected = 0;
    for result in results {
        match result {
            Ok(connection) => established.push(connection),
            Err(ClientError::Redirected { .. }) => redirected += 1,
            Err(e) => panic!("unexpected handshake failure: {e}"),
        }
    }
    assert_eq!(established.len(), 1);
    assert_eq!(redirected, 7);
}

#[tokio::test]
async fn requests_before_handshake_are_not_authorized() {
    let server = TestServer::start().await;
    let mut ws = raw_connect(server.addr).await;

    let request = FeedRequest::new(id("a", "b")).with_correlation_id(CorrelationId::new(77));
    raw_send(&mut ws, &CogdaMessage::SubscriptionRequest(request)).await;

    let CogdaMessage::SubscriptionResponse(response) = raw_recv(&mut ws).await else {
        panic!("expected subscription response");
    };
    assert_eq!(response.fields().generic_result(), GenericResult::NotAuthorized);
    assert_eq!(response.fields().correlation_id(), Some(CorrelationId::new(77)));
    assert!(response.snapshot().is_empty());

    // The connection stays usable for a handshake afterwards.
    let response = raw_handshake(&mut ws, "alice", "secret").await;
    assert_eq!(response.result(), ConnectionResult::NewConnectionSuccess);
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test]
async fn subscribe_echoes_correlation_id_on_the_wire() {
    let server = TestServer::start().await;
    let mut ws = raw_connect(server.addr).await;
    raw_handshake(&mut ws, "alice", "secret").await;

    let request = FeedRequest::new(id("a", "b"))
        .with_correlation_id(CorrelationId::new(123))
        .with_normalization_scheme(scheme("scheme"));
    raw_send(&mut ws, &CogdaMessage::SubscriptionRequest(request)).await;

    let CogdaMessage::SubscriptionResponse(response) = raw_recv(&mut ws).await else {
        panic!("expected subscription response");
    };
    let shared = response.fields();
    assert_eq!(shared.generic_result(), GenericResult::Successful);
    assert_eq!(shared.correlation_id(), Some(CorrelationId::new(123)));
    assert_eq!(shared.subscription_id(), &id("a", "b"));
    assert_eq!(shared.normalization_scheme(), Some(&scheme("scheme")));
    assert_eq!(response.snapshot().len(), 2);
}

#[tokio::test]
async fn subscribe_with_client() {
    let server = TestServer::start().await;
    let (client, _updates) = server.connect().await;

    let response = client
        .subscribe(id("a", "b"), Some(scheme("scheme")))
        .await
        .unwrap();

    assert_eq!(response.fields().generic_result(), GenericResult::Successful);
    assert_eq!(response.fields().subscription_id(), &id("a", "b"));
    assert_eq!(
        response.snapshot().get("Market_Value").and_then(FieldValue::as_f64),
        Some(1.25)
    );
    assert!(server.registry.is_active(&id("a", "b")));
}

#[tokio::test]
async fn unentitled_subscribe_creates_nothing() {
    let server =
        TestServer::start_with(SessionPolicy::default(), SchemeEntitlements::for_schemes(["a"])).await;
    let (client, _updates) = server.connect().await;

    let response = client.subscribe(id("restricted", "x"), None).await.unwrap();

    assert_eq!(response.fields().generic_result(), GenericResult::NotAuthorized);
    assert!(response.snapshot().is_empty());
    assert!(response.fields().user_message().is_some());
    assert!(!server.registry.is_active(&id("restricted", "x")));

    client.unsubscribe(id("restricted", "x")).await.unwrap();
    let snapshot = client.snapshot(id("a", "b"), None).await.unwrap();
    assert_eq!(snapshot.fields().generic_result(), GenericResult::Successful);
}

#[tokio::test]
async fn unknown_feed_is_not_available() {
    let server = TestServer::start().await;
    let (client, _updates) = server.connect().await;

    let response = client.subscribe(id("a", "missing"), None).await.unwrap();

    assert_eq!(response.fields().generic_result(), GenericResult::NotAvailable);
    assert!(!server.registry.is_active(&id("a", "missing")));
}

#[tokio::test]
async fn snapshot_does_not_subscribe() {
    let server = TestServer::start().await;
    let (client, _updates) = server.connect().await;

    let response = client.snapshot(id("a", "c"), None).await.unwrap();

    assert_eq!(response.fields().generic_result(), GenericResult::Successful);
    assert_eq!(
        response.values().get("Market_Value").and_then(FieldValue::as_f64),
        Some(7.0)
    );
    assert!(!server.registry.is_active(&id("a", "c")));
}

#[tokio::test]
async fn pipelined_requests_match_by_correlation_id() {
    let server = TestServer::start().await;
    let (client, _updates) = server.connect().await;

    let first = client.issue_subscribe(id("a", "b"), None).await.unwrap();
    let second = client.issue_snapshot(id("a", "c"), None).await.unwrap();
    let third = client.issue_subscribe(id("a", "missing"), None).await.unwrap();

    let ids = [first.correlation_id(), second.correlation_id(), third.correlation_id()];
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);

    // Await in reverse order of issue.
    let third = third.wait().await.unwrap();
    let second = second.wait().await.unwrap();
    let first = first.wait().await.unwrap();

    assert_eq!(third.fields().correlation_id(), Some(ids[2]));
    assert_eq!(third.fields().generic_result(), GenericResult::NotAvailable);
    assert_eq!(second.fields().correlation_id(), Some(ids[1]));
    assert_eq!(second.fields().subscription_id(), &id("a", "c"));
    assert_eq!(first.fields().correlation_id(), Some(ids[0]));
    assert_eq!(first.fields().generic_result(), GenericResult::Successful);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn unsubscribe_releases_feed() {
    let server = TestServer::start().await;
    let (client, _updates) = server.connect().await;

    client.subscribe(id("a", "b"), None).await.unwrap();
    assert!(server.registry.is_active(&id("a", "b")));

    client.unsubscribe(id("a", "b")).await.unwrap();
    client.unsubscribe(id("a", "b")).await.unwrap();

    let registry = Arc::clone(&server.registry);
    assert!(eventually(|| {
        let registry = Arc::clone(&registry);
        async move { !registry.is_active(&id("a", "b")) }
    })
    .await);
}

// =============================================================================
// Push Updates
// =============================================================================

#[tokio::test]
async fn updates_carry_no_correlation_id() {
    let server = TestServer::start().await;
    let mut ws = raw_connect(server.addr).await;
    raw_handshake(&mut ws, "alice", "secret").await;

    let request = FeedRequest::new(id("a", "b"))
        .with_correlation_id(CorrelationId::new(5))
        .with_normalization_scheme(scheme("scheme"));
    raw_send(&mut ws, &CogdaMessage::SubscriptionRequest(request)).await;
    raw_recv(&mut ws).await;

    server
        .source
        .publish(&id("a", "b"), WireMessage::new().with("Market_Value", 1.5))
        .unwrap();

    let bytes = raw_recv_bytes(&mut ws).await.unwrap();
    let wire = MsgPackCodec::new()
        .decode(&WireContext::default(), &bytes)
        .unwrap();
    assert!(!wire.has_field(fields::CORRELATION_ID));
    assert!(!wire.has_field(fields::GENERIC_RESULT));
    assert_eq!(
        wire.get(fields::MESSAGE_TYPE).and_then(FieldValue::as_str),
        Some("LIVE_DATA_UPDATE")
    );

    let CogdaMessage::LiveDataUpdate(update) =
        decode_message(&MsgPackCodec::new(), &WireContext::default(), &bytes).unwrap()
    else {
        panic!("expected live data update");
    };
    assert_eq!(update.subscription_id(), &id("a", "b"));
    assert_eq!(update.normalization_scheme(), Some(&scheme("scheme")));
    assert_eq!(update.values().len(), 1);
}

#[tokio::test]
async fn updates_follow_publish_order() {
    let server = TestServer::start().await;
    let (client, mut updates) = server.connect().await;

    client.subscribe(id("a", "b"), None).await.unwrap();
    for price in [2.0, 3.0, 4.0] {
        server
            .source
            .publish(&id("a", "b"), WireMessage::new().with("Market_Value", price))
            .unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        seen.push(update.values().get("Market_Value").and_then(FieldValue::as_f64));
    }
    assert_eq!(seen, vec![Some(2.0), Some(3.0), Some(4.0)]);
}

#[tokio::test]
async fn unread_updates_do_not_block_responses() {
    let server = TestServer::start().await;
    let config = ClientConfig::new(server.url(), "alice")
        .with_password("secret")
        .with_request_timeout(Duration::from_secs(2))
        .with_updates_capacity(2);
    let (client, _updates) = CogdaClient::connect(config).await.unwrap();

    client.subscribe(id("a", "b"), None).await.unwrap();
    for step in 0..10 {
        server
            .source
            .publish(&id("a", "b"), WireMessage::new().with("Market_Value", f64::from(step)))
            .unwrap();
    }
    assert!(eventually(|| {
        let dropped = client.dropped_updates();
        async move { dropped > 0 }
    })
    .await);

    let response = client.snapshot(id("a", "c"), None).await.unwrap();

    assert_eq!(response.fields().generic_result(), GenericResult::Successful);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn unsubscribed_feed_gets_no_updates() {
    let server = TestServer::start().await;
    let (client, mut updates) = server.connect().await;

    client.subscribe(id("a", "b"), None).await.unwrap();
    client.subscribe(id("a", "c"), None).await.unwrap();
    client.unsubscribe(id("a", "b")).await.unwrap();

    // The round trip orders the unsubscribe before the publishes below.
    client.snapshot(id("a", "c"), None).await.unwrap();

    server
        .source
        .publish(&id("a", "b"), WireMessage::new().with("Market_Value", 9.0))
        .unwrap();
    server
        .source
        .publish(&id("a", "c"), WireMessage::new().with("Market_Value", 8.0))
        .unwrap();

    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.subscription_id(), &id("a", "c"));
}

// =============================================================================
// Connection Loss
// =============================================================================

#[tokio::test]
async fn disconnect_releases_subscriptions() {
    let server = TestServer::start().await;
    let (client, _updates) = server.connect().await;

    client.subscribe(id("a", "b"), None).await.unwrap();
    client.subscribe(id("a", "c"), None).await.unwrap();
    assert_eq!(server.registry.stats().feed_count, 2);

    client.close().await;
    assert!(!client.is_connected());

    let registry = Arc::clone(&server.registry);
    assert!(eventually(|| {
        let registry = Arc::clone(&registry);
        async move { registry.stats().feed_count == 0 }
    })
    .await);

    let result = client.subscribe(id("a", "b"), None).await;
    assert!(matches!(result, Err(ClientError::ConnectionLost)));
}

/// Server that completes the handshake, reads one request, then hangs up
/// (or keeps silent when `hang_up` is false).
async fn one_shot_server(hang_up: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let codec = MsgPackCodec::new();
        let ctx = WireContext::default();

        // Connection request
        ws.next().await;
        let response = CogdaMessage::ConnectionResponse(ConnectionResponse::established(WireMessage::new()));
        let bytes = encode_message(&codec, &ctx, &response).unwrap();
        ws.send(Message::Binary(bytes.into())).await.unwrap();

        // First request goes unanswered
        ws.next().await;
        if hang_up {
            drop(ws);
        } else {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    });

    addr
}

#[tokio::test]
async fn connection_loss_fails_pending_requests() {
    let addr = one_shot_server(true).await;
    let (client, _updates) = CogdaClient::connect(ClientConfig::new(format!("ws://{addr}"), "alice"))
        .await
        .unwrap();

    let handle = client.issue_subscribe(id("a", "b"), None).await.unwrap();
    let result = timeout(WAIT, handle.wait()).await.unwrap();

    assert!(matches!(result, Err(ClientError::ConnectionLost)));
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let addr = one_shot_server(false).await;
    let config = ClientConfig::new(format!("ws://{addr}"), "alice")
        .with_request_timeout(Duration::from_millis(100));
    let (client, _updates) = CogdaClient::connect(config).await.unwrap();

    let handle = client.issue_snapshot(id("a", "b"), None).await.unwrap();
    let correlation_id = handle.correlation_id();
    let result = handle.wait().await;

    assert!(matches!(result, Err(ClientError::Timeout(timed_out)) if timed_out == correlation_id));
    assert_eq!(client.pending_requests(), 0);
}
