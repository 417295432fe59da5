//! Cogda Message Catalog
//!
//! The closed set of protocol messages. Each kind is an immutable value;
//! kinds with optional or cross-checked fields are built through validating
//! builders so an invalid message cannot be constructed. [`CogdaMessage`]
//! is the tagged union used for dispatch; the wire `MESSAGE_TYPE` field
//! exists only for the encoded form (see [`super::adapter`]).
//!
//! # Message Kinds
//!
//! | Kind | Direction | Payload |
//! |---|---|---|
//! | `CONNECTION_REQUEST` | client → server | user, password, capabilities |
//! | `CONNECTION_RESPONSE` | server → client | result, capabilities, servers |
//! | `SUBSCRIPTION_REQUEST` | client → server | feed request |
//! | `SNAPSHOT_REQUEST` | client → server | feed request |
//! | `UNSUBSCRIBE` | client → server | feed request (no response) |
//! | `SUBSCRIPTION_RESPONSE` | server → client | response fields + `snapshot` |
//! | `SNAPSHOT_RESPONSE` | server → client | response fields + `values` |
//! | `LIVE_DATA_UPDATE` | server → client (push) | id, scheme, `values` |

use std::fmt;
use std::str::FromStr;

use crate::domain::identifiers::{CorrelationId, NormalizationScheme, SubscriptionId};
use crate::domain::results::{ConnectionResult, GenericResult};
use crate::infrastructure::wire::{MalformedMessage, WireMessage};

// =============================================================================
// Field Names
// =============================================================================

/// Exact wire field names.
pub mod fields {
    /// Connection request user.
    pub const USER_NAME: &str = "userName";
    /// Connection request password.
    pub const PASSWORD: &str = "password";
    /// Capability set, request and response.
    pub const CAPABILITIES: &str = "capabilities";
    /// Connection result name.
    pub const RESULT: &str = "result";
    /// Alternate server, repeated once per entry.
    pub const AVAILABLE_SERVERS: &str = "availableServers";
    /// Request/response correlation token.
    pub const CORRELATION_ID: &str = "correlationId";
    /// Subscription id scheme.
    pub const SUBSCRIPTION_ID_SCHEME: &str = "subscriptionIdScheme";
    /// Subscription id value.
    pub const SUBSCRIPTION_ID_VALUE: &str = "subscriptionIdValue";
    /// Normalization scheme tag.
    pub const NORMALIZATION_SCHEME: &str = "normalizationScheme";
    /// Generic result name.
    pub const GENERIC_RESULT: &str = "genericResult";
    /// Diagnostic text.
    pub const USER_MESSAGE: &str = "userMessage";
    /// Snapshot response and update payload.
    pub const VALUES: &str = "values";
    /// Subscription response payload.
    pub const SNAPSHOT: &str = "snapshot";
    /// Message kind discriminator.
    pub const MESSAGE_TYPE: &str = "MESSAGE_TYPE";
}

// =============================================================================
// Message Type
// =============================================================================

/// Discriminator of the message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client handshake.
    ConnectionRequest,
    /// Server handshake answer.
    ConnectionResponse,
    /// Subscribe to a feed.
    SubscriptionRequest,
    /// Answer to a subscribe.
    SubscriptionResponse,
    /// One-shot read of a feed.
    SnapshotRequest,
    /// Answer to a snapshot.
    SnapshotResponse,
    /// Stop a subscription.
    Unsubscribe,
    /// Push update for an active subscription.
    LiveDataUpdate,
}

impl MessageType {
    /// Every message kind.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::ConnectionRequest,
            Self::ConnectionResponse,
            Self::SubscriptionRequest,
            Self::SubscriptionResponse,
            Self::SnapshotRequest,
            Self::SnapshotResponse,
            Self::Unsubscribe,
            Self::LiveDataUpdate,
        ]
    }

    /// Wire name written to `MESSAGE_TYPE`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRequest => "CONNECTION_REQUEST",
            Self::ConnectionResponse => "CONNECTION_RESPONSE",
            Self::SubscriptionRequest => "SUBSCRIPTION_REQUEST",
            Self::SubscriptionResponse => "SUBSCRIPTION_RESPONSE",
            Self::SnapshotRequest => "SNAPSHOT_REQUEST",
            Self::SnapshotResponse => "SNAPSHOT_RESPONSE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::LiveDataUpdate => "LIVE_DATA_UPDATE",
        }
    }
}

impl FromStr for MessageType {
    type Err = MalformedMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MalformedMessage::UnknownMessageType(s.to_string()))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Connection Request
// =============================================================================

/// Client handshake: identity plus proposed capabilities.
#[derive(Clone, PartialEq)]
pub struct ConnectionRequest {
    user_name: String,
    password: Option<String>,
    capabilities: WireMessage,
}

impl ConnectionRequest {
    /// Start building a connection request.
    #[must_use]
    pub fn builder() -> ConnectionRequestBuilder {
        ConnectionRequestBuilder::default()
    }

    /// Requesting user.
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Password, if the deployment uses one.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Proposed capability set (possibly empty).
    #[must_use]
    pub const fn capabilities(&self) -> &WireMessage {
        &self.capabilities
    }
}

impl fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Builder for [`ConnectionRequest`].
#[derive(Default)]
pub struct ConnectionRequestBuilder {
    user_name: Option<String>,
    password: Option<String>,
    capabilities: Option<WireMessage>,
}

impl ConnectionRequestBuilder {
    /// Set the user name (mandatory).
    #[must_use]
    pub fn user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the proposed capabilities. Defaults to an empty set.
    #[must_use]
    pub fn capabilities(mut self, capabilities: WireMessage) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns an error if the user name is missing or empty.
    pub fn build(self) -> Result<ConnectionRequest, MalformedMessage> {
        let user_name = self
            .user_name
            .ok_or(MalformedMessage::MissingField(fields::USER_NAME))?;
        if user_name.is_empty() {
            return Err(MalformedMessage::InvalidValue {
                field: fields::USER_NAME,
                reason: "user name cannot be empty".to_string(),
            });
        }

        Ok(ConnectionRequest {
            user_name,
            password: self.password,
            capabilities: self.capabilities.unwrap_or_default(),
        })
    }
}

// =============================================================================
// Connection Response
// =============================================================================

/// Server handshake answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionResponse {
    result: ConnectionResult,
    capabilities: WireMessage,
    available_servers: Vec<String>,
}

impl ConnectionResponse {
    /// Session established with the effective capability set.
    #[must_use]
    pub const fn established(capabilities: WireMessage) -> Self {
        Self {
            result: ConnectionResult::NewConnectionSuccess,
            capabilities,
            available_servers: Vec::new(),
        }
    }

    /// Credentials rejected; the client's own capabilities are echoed back.
    #[must_use]
    pub const fn not_authorized(client_capabilities: WireMessage) -> Self {
        Self {
            result: ConnectionResult::NotAuthorized,
            capabilities: client_capabilities,
            available_servers: Vec::new(),
        }
    }

    /// Redirect to alternate servers.
    ///
    /// # Errors
    ///
    /// Returns an error if `servers` is empty.
    pub fn redirected(
        client_capabilities: WireMessage,
        servers: Vec<String>,
    ) -> Result<Self, MalformedMessage> {
        Self::builder()
            .result(ConnectionResult::Redirected)
            .capabilities(client_capabilities)
            .available_servers(servers)
            .build()
    }

    /// Start building a connection response.
    #[must_use]
    pub fn builder() -> ConnectionResponseBuilder {
        ConnectionResponseBuilder::default()
    }

    /// Handshake outcome.
    #[must_use]
    pub const fn result(&self) -> ConnectionResult {
        self.result
    }

    /// Effective (or echoed) capability set.
    #[must_use]
    pub const fn capabilities(&self) -> &WireMessage {
        &self.capabilities
    }

    /// Alternate servers, in preference order. Empty unless redirected.
    #[must_use]
    pub fn available_servers(&self) -> &[String] {
        &self.available_servers
    }
}

/// Builder for [`ConnectionResponse`].
#[derive(Debug, Default)]
pub struct ConnectionResponseBuilder {
    result: Option<ConnectionResult>,
    capabilities: Option<WireMessage>,
    available_servers: Vec<String>,
}

impl ConnectionResponseBuilder {
    /// Set the result (mandatory).
    #[must_use]
    pub const fn result(mut self, result: ConnectionResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Set the capability set (mandatory).
    #[must_use]
    pub fn capabilities(mut self, capabilities: WireMessage) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Set the alternate servers.
    #[must_use]
    pub fn available_servers(mut self, servers: Vec<String>) -> Self {
        self.available_servers = servers;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns an error if the result or capabilities are missing, or a
    /// redirect carries no servers.
    pub fn build(self) -> Result<ConnectionResponse, MalformedMessage> {
        let result = self
            .result
            .ok_or(MalformedMessage::MissingField(fields::RESULT))?;
        let capabilities = self
            .capabilities
            .ok_or(MalformedMessage::MissingField(fields::CAPABILITIES))?;

        if result == ConnectionResult::Redirected && self.available_servers.is_empty() {
            return Err(MalformedMessage::InvalidValue {
                field: fields::AVAILABLE_SERVERS,
                reason: "a redirect must list at least one server".to_string(),
            });
        }

        Ok(ConnectionResponse {
            result,
            capabilities,
            available_servers: self.available_servers,
        })
    }
}

// =============================================================================
// Feed Requests
// =============================================================================

/// Fields shared by subscribe, snapshot and unsubscribe requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    correlation_id: Option<CorrelationId>,
    subscription_id: SubscriptionId,
    normalization_scheme: Option<NormalizationScheme>,
}

impl FeedRequest {
    /// Request for a feed, without correlation id or scheme.
    #[must_use]
    pub const fn new(subscription_id: SubscriptionId) -> Self {
        Self {
            correlation_id: None,
            subscription_id,
            normalization_scheme: None,
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub const fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Attach a normalization scheme.
    #[must_use]
    pub fn with_normalization_scheme(mut self, scheme: NormalizationScheme) -> Self {
        self.normalization_scheme = Some(scheme);
        self
    }

    /// Correlation id, if any.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// Requested feed.
    #[must_use]
    pub const fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Requested normalization scheme, if any.
    #[must_use]
    pub const fn normalization_scheme(&self) -> Option<&NormalizationScheme> {
        self.normalization_scheme.as_ref()
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Fields common to every command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFields {
    correlation_id: Option<CorrelationId>,
    subscription_id: SubscriptionId,
    normalization_scheme: Option<NormalizationScheme>,
    generic_result: GenericResult,
    user_message: Option<String>,
}

impl ResponseFields {
    /// Start building response fields.
    #[must_use]
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// Response fields answering `request`, echoing its correlation id.
    #[must_use]
    pub fn answering(
        request: &FeedRequest,
        subscription_id: SubscriptionId,
        normalization_scheme: Option<NormalizationScheme>,
        generic_result: GenericResult,
        user_message: Option<String>,
    ) -> Self {
        Self {
            correlation_id: request.correlation_id,
            subscription_id,
            normalization_scheme,
            generic_result,
            user_message,
        }
    }

    /// Correlation id echoed from the request.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// Resolved feed.
    #[must_use]
    pub const fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Scheme the payload is expressed in.
    #[must_use]
    pub const fn normalization_scheme(&self) -> Option<&NormalizationScheme> {
        self.normalization_scheme.as_ref()
    }

    /// Outcome.
    #[must_use]
    pub const fn generic_result(&self) -> GenericResult {
        self.generic_result
    }

    /// Diagnostic text.
    #[must_use]
    pub fn user_message(&self) -> Option<&str> {
        self.user_message.as_deref()
    }
}

/// Builder for [`ResponseFields`].
///
/// Populated field by field (see `set_response_fields`), then validated.
#[derive(Debug, Clone, Default)]
pub struct ResponseBuilder {
    correlation_id: Option<CorrelationId>,
    subscription_id: Option<SubscriptionId>,
    normalization_scheme: Option<NormalizationScheme>,
    generic_result: Option<GenericResult>,
    user_message: Option<String>,
}

impl ResponseBuilder {
    /// Set the correlation id.
    pub const fn correlation_id(&mut self, correlation_id: CorrelationId) -> &mut Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the subscription id (mandatory).
    pub fn subscription_id(&mut self, subscription_id: SubscriptionId) -> &mut Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    /// Set the normalization scheme.
    pub fn normalization_scheme(&mut self, scheme: NormalizationScheme) -> &mut Self {
        self.normalization_scheme = Some(scheme);
        self
    }

    /// Set the generic result (mandatory).
    pub const fn generic_result(&mut self, result: GenericResult) -> &mut Self {
        self.generic_result = Some(result);
        self
    }

    /// Set the diagnostic text.
    pub fn user_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.user_message = Some(message.into());
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription id or generic result is missing.
    pub fn build(&self) -> Result<ResponseFields, MalformedMessage> {
        let subscription_id = self
            .subscription_id
            .clone()
            .ok_or(MalformedMessage::MissingField(fields::SUBSCRIPTION_ID_SCHEME))?;
        let generic_result = self
            .generic_result
            .ok_or(MalformedMessage::MissingField(fields::GENERIC_RESULT))?;

        Ok(ResponseFields {
            correlation_id: self.correlation_id,
            subscription_id,
            normalization_scheme: self.normalization_scheme.clone(),
            generic_result,
            user_message: self.user_message.clone(),
        })
    }
}

/// A response kind built from [`ResponseFields`] plus one payload message.
pub trait ResponseMessage {
    /// Kind discriminator.
    const MESSAGE_TYPE: MessageType;
    /// Name of the payload field.
    const PAYLOAD_FIELD: &'static str;

    /// Shared response fields.
    fn fields(&self) -> &ResponseFields;

    /// Payload message.
    fn payload(&self) -> &WireMessage;
}

/// Answer to a subscribe, carrying the initial snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionResponse {
    fields: ResponseFields,
    snapshot: WireMessage,
}

impl SubscriptionResponse {
    /// Create a subscription response.
    #[must_use]
    pub const fn new(fields: ResponseFields, snapshot: WireMessage) -> Self {
        Self { fields, snapshot }
    }

    /// Initial values; empty when the subscribe failed.
    #[must_use]
    pub const fn snapshot(&self) -> &WireMessage {
        &self.snapshot
    }
}

impl ResponseMessage for SubscriptionResponse {
    const MESSAGE_TYPE: MessageType = MessageType::SubscriptionResponse;
    const PAYLOAD_FIELD: &'static str = fields::SNAPSHOT;

    fn fields(&self) -> &ResponseFields {
        &self.fields
    }

    fn payload(&self) -> &WireMessage {
        &self.snapshot
    }
}

/// Answer to a snapshot request.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotResponse {
    fields: ResponseFields,
    values: WireMessage,
}

impl SnapshotResponse {
    /// Create a snapshot response.
    #[must_use]
    pub const fn new(fields: ResponseFields, values: WireMessage) -> Self {
        Self { fields, values }
    }

    /// Current values; empty when the snapshot failed.
    #[must_use]
    pub const fn values(&self) -> &WireMessage {
        &self.values
    }
}

impl ResponseMessage for SnapshotResponse {
    const MESSAGE_TYPE: MessageType = MessageType::SnapshotResponse;
    const PAYLOAD_FIELD: &'static str = fields::VALUES;

    fn fields(&self) -> &ResponseFields {
        &self.fields
    }

    fn payload(&self) -> &WireMessage {
        &self.values
    }
}

/// Either command response, as matched by correlation id on the client.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    /// Subscription response.
    Subscription(SubscriptionResponse),
    /// Snapshot response.
    Snapshot(SnapshotResponse),
}

impl CommandResponse {
    /// Shared response fields.
    #[must_use]
    pub fn fields(&self) -> &ResponseFields {
        match self {
            Self::Subscription(r) => r.fields(),
            Self::Snapshot(r) => r.fields(),
        }
    }

    /// Kind discriminator.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Subscription(_) => MessageType::SubscriptionResponse,
            Self::Snapshot(_) => MessageType::SnapshotResponse,
        }
    }
}

// =============================================================================
// Push Update
// =============================================================================

/// Changed values for an active subscription.
///
/// Carries neither a correlation id nor a generic result.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveDataUpdate {
    subscription_id: SubscriptionId,
    normalization_scheme: Option<NormalizationScheme>,
    values: WireMessage,
}

impl LiveDataUpdate {
    /// Create an update.
    #[must_use]
    pub const fn new(
        subscription_id: SubscriptionId,
        normalization_scheme: Option<NormalizationScheme>,
        values: WireMessage,
    ) -> Self {
        Self {
            subscription_id,
            normalization_scheme,
            values,
        }
    }

    /// Feed the update belongs to.
    #[must_use]
    pub const fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Scheme the values are expressed in.
    #[must_use]
    pub const fn normalization_scheme(&self) -> Option<&NormalizationScheme> {
        self.normalization_scheme.as_ref()
    }

    /// Changed fields.
    #[must_use]
    pub const fn values(&self) -> &WireMessage {
        &self.values
    }
}

// =============================================================================
// Tagged Union
// =============================================================================

/// Every Cogda protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum CogdaMessage {
    /// Client handshake.
    ConnectionRequest(ConnectionRequest),
    /// Server handshake answer.
    ConnectionResponse(ConnectionResponse),
    /// Subscribe.
    SubscriptionRequest(FeedRequest),
    /// One-shot read.
    SnapshotRequest(FeedRequest),
    /// Stop a subscription.
    Unsubscribe(FeedRequest),
    /// Subscribe answer.
    SubscriptionResponse(SubscriptionResponse),
    /// Snapshot answer.
    SnapshotResponse(SnapshotResponse),
    /// Push update.
    LiveDataUpdate(LiveDataUpdate),
}

impl CogdaMessage {
    /// Kind discriminator.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::ConnectionRequest(_) => MessageType::ConnectionRequest,
            Self::ConnectionResponse(_) => MessageType::ConnectionResponse,
            Self::SubscriptionRequest(_) => MessageType::SubscriptionRequest,
            Self::SnapshotRequest(_) => MessageType::SnapshotRequest,
            Self::Unsubscribe(_) => MessageType::Unsubscribe,
            Self::SubscriptionResponse(_) => MessageType::SubscriptionResponse,
            Self::SnapshotResponse(_) => MessageType::SnapshotResponse,
            Self::LiveDataUpdate(_) => MessageType::LiveDataUpdate,
        }
    }
}

impl From<CommandResponse> for CogdaMessage {
    fn from(response: CommandResponse) -> Self {
        match response {
            CommandResponse::Subscription(r) => Self::SubscriptionResponse(r),
            CommandResponse::Snapshot(r) => Self::SnapshotResponse(r),
        }
    }
}
