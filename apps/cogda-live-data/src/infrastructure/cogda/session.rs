//! Connection Session
//!
//! Server-side handshake state machine for one connection.
//!
//! # States
//!
//! ```text
//! Unauthenticated ──request──▶ Negotiating ──┬──▶ Established
//!                                            ├──▶ Rejected
//!                                            └──▶ Redirected
//! ```
//!
//! Only `Established` sessions accept subscription and snapshot requests.
//! `Rejected` and `Redirected` are terminal: the server closes the socket
//! after writing the response.

use thiserror::Error;

use crate::application::ports::Authenticator;
use crate::domain::results::ConnectionResult;
use crate::infrastructure::wire::WireMessage;

use super::messages::{ConnectionRequest, ConnectionResponse};

/// Capability advertised by the server in every established session.
pub const SERVER_VERSION_CAPABILITY: &str = "serverVersion";

// =============================================================================
// State
// =============================================================================

/// Handshake state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection request received yet.
    #[default]
    Unauthenticated,
    /// Connection request received, outcome pending.
    Negotiating,
    /// Handshake succeeded.
    Established,
    /// Credentials rejected.
    Rejected,
    /// Sent elsewhere by load balancing.
    Redirected,
}

impl SessionState {
    /// State name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Negotiating => "negotiating",
            Self::Established => "established",
            Self::Rejected => "rejected",
            Self::Redirected => "redirected",
        }
    }

    /// Whether subscription and snapshot requests are accepted.
    #[must_use]
    pub const fn accepts_requests(self) -> bool {
        matches!(self, Self::Established)
    }

    /// Whether the server must close the connection.
    #[must_use]
    pub const fn is_closing(self) -> bool {
        matches!(self, Self::Rejected | Self::Redirected)
    }
}

/// Invalid session transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A connection request arrived after the handshake.
    #[error("connection request received in {0} state")]
    AlreadyNegotiated(&'static str),
}

// =============================================================================
// Policy
// =============================================================================

/// Server view of capability negotiation.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    accepted: Vec<String>,
    advertised: WireMessage,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CapabilityPolicy {
    /// Accept the named client capabilities (all if empty) and advertise
    /// the server version.
    #[must_use]
    pub fn new(accepted: Vec<String>) -> Self {
        Self {
            accepted,
            advertised: WireMessage::new()
                .with(SERVER_VERSION_CAPABILITY, env!("CARGO_PKG_VERSION")),
        }
    }

    /// Effective capabilities for a proposal: accepted client fields, then
    /// the server's own.
    #[must_use]
    pub fn negotiate(&self, proposed: &WireMessage) -> WireMessage {
        let mut effective: WireMessage = proposed
            .fields()
            .iter()
            .filter(|field| self.accepts(field.name()))
            .map(|field| (field.name().to_string(), field.value().clone()))
            .collect();
        effective.merge(&self.advertised);
        effective
    }

    fn accepts(&self, name: &str) -> bool {
        self.accepted.is_empty() || self.accepted.iter().any(|a| a == name)
    }
}

/// Handshake rules shared by every connection on a server.
#[derive(Debug, Clone, Default)]
pub struct SessionPolicy {
    /// Capability negotiation.
    pub capabilities: CapabilityPolicy,
    /// Established sessions allowed before redirecting (0 = unlimited).
    pub max_connections: usize,
    /// Alternate servers offered on redirect.
    pub redirect_servers: Vec<String>,
}

impl SessionPolicy {
    /// Servers to redirect to, given the current established session count.
    #[must_use]
    pub fn redirect_target(&self, established: usize) -> Option<&[String]> {
        let over_limit = self.max_connections > 0 && established >= self.max_connections;
        (over_limit && !self.redirect_servers.is_empty()).then_some(self.redirect_servers.as_slice())
    }
}

// =============================================================================
// Session
// =============================================================================

/// Handshake state and negotiated identity for one connection.
#[derive(Debug, Default)]
pub struct ConnectionSession {
    state: SessionState,
    user_name: Option<String>,
    capabilities: WireMessage,
}

impl ConnectionSession {
    /// New, unauthenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Authenticated user, once established.
    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Effective capabilities, once established.
    #[must_use]
    pub const fn capabilities(&self) -> &WireMessage {
        &self.capabilities
    }

    /// Run the handshake for a connection request.
    ///
    /// Redirect is decided before credentials are checked.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyNegotiated`] if the session has left
    /// `Unauthenticated`.
    pub async fn handshake(
        &mut self,
        request: &ConnectionRequest,
        authenticator: &dyn Authenticator,
        policy: &SessionPolicy,
        established: usize,
    ) -> Result<ConnectionResponse, SessionError> {
        if self.state != SessionState::Unauthenticated {
            return Err(SessionError::AlreadyNegotiated(self.state.as_str()));
        }
        self.state = SessionState::Negotiating;

        if let Some(servers) = policy.redirect_target(established) {
            let response =
                ConnectionResponse::redirected(request.capabilities().clone(), servers.to_vec());
            if let Ok(response) = response {
                self.state = SessionState::Redirected;
                return Ok(response);
            }
        }

        if !authenticator
            .authenticate(request.user_name(), request.password())
            .await
        {
            self.state = SessionState::Rejected;
            return Ok(ConnectionResponse::not_authorized(
                request.capabilities().clone(),
            ));
        }

        self.capabilities = policy.capabilities.negotiate(request.capabilities());
        self.user_name = Some(request.user_name().to_string());
        self.state = SessionState::Established;
        Ok(ConnectionResponse::established(self.capabilities.clone()))
    }
}

/// Metric label for a handshake outcome.
#[must_use]
pub const fn handshake_label(result: ConnectionResult) -> &'static str {
    match result {
        ConnectionResult::NewConnectionSuccess | ConnectionResult::ExistingConnectionRestart => {
            "established"
        }
        ConnectionResult::NotAuthorized => "not_authorized",
        ConnectionResult::Redirected => "redirected",
    }
}
