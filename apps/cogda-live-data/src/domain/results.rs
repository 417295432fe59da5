//! Outcome Enumerations
//!
//! `GenericResult` signals the outcome of a subscription or snapshot request;
//! `ConnectionResult` the outcome of a handshake. Both travel on the wire as
//! their upper-case names. Names outside the known set decode to an error
//! rather than a guessed default.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A result name that is not part of the known enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} name `{name}`")]
pub struct UnknownResultName {
    /// Which enumeration was being decoded.
    pub kind: &'static str,
    /// The name that failed to decode.
    pub name: String,
}

// =============================================================================
// Generic Result
// =============================================================================

/// Outcome of a subscription or snapshot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum GenericResult {
    /// Request satisfied.
    Successful,
    /// Caller lacks entitlement for the feed.
    NotAuthorized,
    /// Feed is unknown to the server.
    NotAvailable,
    /// Server failed while resolving the feed.
    InternalError,
}

impl GenericResult {
    /// Wire name of the result.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Successful => "SUCCESSFUL",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::NotAvailable => "NOT_AVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the request succeeded.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Successful)
    }
}

impl FromStr for GenericResult {
    type Err = UnknownResultName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESSFUL" => Ok(Self::Successful),
            "NOT_AUTHORIZED" => Ok(Self::NotAuthorized),
            "NOT_AVAILABLE" => Ok(Self::NotAvailable),
            "INTERNAL_ERROR" => Ok(Self::InternalError),
            other => Err(UnknownResultName {
                kind: "genericResult",
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for GenericResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Connection Result
// =============================================================================

/// Outcome of a connection handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConnectionResult {
    /// Fresh session established.
    NewConnectionSuccess,
    /// Session established, replacing an earlier one for the same client.
    ExistingConnectionRestart,
    /// Credentials rejected.
    NotAuthorized,
    /// Server is full; reconnect to one of the listed servers.
    Redirected,
}

impl ConnectionResult {
    /// Wire name of the result.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewConnectionSuccess => "NEW_CONNECTION_SUCCESS",
            Self::ExistingConnectionRestart => "EXISTING_CONNECTION_RESTART",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::Redirected => "REDIRECTED",
        }
    }

    /// Whether the session may proceed to issue requests.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            Self::NewConnectionSuccess | Self::ExistingConnectionRestart
        )
    }
}

impl FromStr for ConnectionResult {
    type Err = UnknownResultName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW_CONNECTION_SUCCESS" => Ok(Self::NewConnectionSuccess),
            "EXISTING_CONNECTION_RESTART" => Ok(Self::ExistingConnectionRestart),
            "NOT_AUTHORIZED" => Ok(Self::NotAuthorized),
            "REDIRECTED" => Ok(Self::Redirected),
            other => Err(UnknownResultName {
                kind: "result",
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ConnectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(GenericResult::Successful, "SUCCESSFUL")]
    #[test_case(GenericResult::NotAuthorized, "NOT_AUTHORIZED")]
    #[test_case(GenericResult::NotAvailable, "NOT_AVAILABLE")]
    #[test_case(GenericResult::InternalError, "INTERNAL_ERROR")]
    fn generic_result_names(result: GenericResult, name: &str) {
        assert_eq!(result.as_str(), name);
        assert_eq!(name.parse::<GenericResult>().unwrap(), result);
    }

    #[test_case(ConnectionResult::NewConnectionSuccess, "NEW_CONNECTION_SUCCESS")]
    #[test_case(ConnectionResult::ExistingConnectionRestart, "EXISTING_CONNECTION_RESTART")]
    #[test_case(ConnectionResult::NotAuthorized, "NOT_AUTHORIZED")]
    #[test_case(ConnectionResult::Redirected, "REDIRECTED")]
    fn connection_result_names(result: ConnectionResult, name: &str) {
        assert_eq!(result.as_str(), name);
        assert_eq!(name.parse::<ConnectionResult>().unwrap(), result);
    }

    #[test]
    fn unknown_names_are_errors() {
        let err = "MAYBE".parse::<GenericResult>().unwrap_err();
        assert_eq!(err.kind, "genericResult");
        assert_eq!(err.name, "MAYBE");

        assert!("successful".parse::<GenericResult>().is_err());
        assert!("".parse::<ConnectionResult>().is_err());
    }

    #[test]
    fn success_classification() {
        assert!(GenericResult::Successful.is_success());
        assert!(!GenericResult::NotAuthorized.is_success());
        assert!(ConnectionResult::NewConnectionSuccess.is_success());
        assert!(ConnectionResult::ExistingConnectionRestart.is_success());
        assert!(!ConnectionResult::NotAuthorized.is_success());
        assert!(!ConnectionResult::Redirected.is_success());
    }
}
