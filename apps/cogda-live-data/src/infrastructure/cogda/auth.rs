//! User Directory and Entitlements
//!
//! Static credential and entitlement sources configured from the
//! environment. A user listed without a password is accepted with any
//! password (or none); schemes are entitled to everyone unless a scheme
//! list is configured.

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;

use crate::application::ports::{Authenticator, EntitlementChecker};
use crate::domain::identifiers::SubscriptionId;

// =============================================================================
// User Directory
// =============================================================================

/// Configured users and their optional passwords.
#[derive(Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, Option<String>>,
}

impl UserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, builder style.
    #[must_use]
    pub fn with_user(mut self, user_name: impl Into<String>, password: Option<String>) -> Self {
        self.insert(user_name, password);
        self
    }

    /// Add or replace a user.
    pub fn insert(&mut self, user_name: impl Into<String>, password: Option<String>) {
        self.users.insert(user_name.into(), password);
    }

    /// Whether the credentials are valid.
    #[must_use]
    pub fn verify(&self, user_name: &str, password: Option<&str>) -> bool {
        match self.users.get(user_name) {
            Some(None) => true,
            Some(Some(expected)) => password == Some(expected.as_str()),
            None => false,
        }
    }

    /// Number of configured users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.users.keys().collect();
        names.sort();
        f.debug_struct("UserDirectory")
            .field("users", &names)
            .field("passwords", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Authenticator for UserDirectory {
    async fn authenticate<'a>(&self, user_name: &str, password: Option<&'a str>) -> bool {
        self.verify(user_name, password)
    }
}

// =============================================================================
// Scheme Entitlements
// =============================================================================

/// Entitles every user to the configured id schemes.
///
/// An empty scheme set entitles everything.
#[derive(Debug, Clone, Default)]
pub struct SchemeEntitlements {
    schemes: HashSet<String>,
}

impl SchemeEntitlements {
    /// Entitle everything.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Entitle only the listed schemes.
    #[must_use]
    pub fn for_schemes<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schemes: schemes.into_iter().map(Into::into).collect(),
        }
    }
}

impl EntitlementChecker for SchemeEntitlements {
    fn is_entitled(&self, _user_name: &str, id: &SubscriptionId) -> bool {
        self.schemes.is_empty() || self.schemes.contains(id.scheme())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_with_password_must_match() {
        let users = UserDirectory::new().with_user("alice", Some("secret".to_string()));

        assert!(users.verify("alice", Some("secret")));
        assert!(!users.verify("alice", Some("wrong")));
        assert!(!users.verify("alice", None));
    }

    #[test]
    fn user_without_password_accepts_anything() {
        let users = UserDirectory::new().with_user("bob", None);

        assert!(users.verify("bob", None));
        assert!(users.verify("bob", Some("whatever")));
    }

    #[test]
    fn unknown_user_is_rejected() {
        let users = UserDirectory::new().with_user("bob", None);
        assert!(!users.verify("mallory", None));
    }

    #[test]
    fn debug_hides_passwords() {
        let users = UserDirectory::new().with_user("alice", Some("hunter2".to_string()));
        let debug = format!("{users:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn authenticator_delegates_to_verify() {
        let users = UserDirectory::new().with_user("alice", Some("pw".to_string()));
        assert!(users.authenticate("alice", Some("pw")).await);
        assert!(!users.authenticate("alice", None).await);
    }

    #[test]
    fn empty_scheme_set_entitles_everything() {
        let id = SubscriptionId::new("ANY", "x").unwrap();
        assert!(SchemeEntitlements::allow_all().is_entitled("u", &id));
    }

    #[test]
    fn scheme_set_filters_by_scheme() {
        let entitlements = SchemeEntitlements::for_schemes(["TICKER"]);
        let allowed = SubscriptionId::new("TICKER", "AAPL").unwrap();
        let denied = SubscriptionId::new("SECRET", "X").unwrap();

        assert!(entitlements.is_entitled("u", &allowed));
        assert!(!entitlements.is_entitled("u", &denied));
    }
}
