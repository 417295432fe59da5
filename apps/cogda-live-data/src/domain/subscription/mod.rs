//! Subscription Tracking
//!
//! Two views of subscription state:
//!
//! - [`SubscriptionTable`]: per-connection mapping
//!   `SubscriptionId -> {PENDING | ACTIVE | CLOSED, NormalizationScheme}`.
//!   Mutated by subscribe/unsubscribe, read by the push dispatcher.
//! - [`FeedRegistry`]: server-wide reference counts of which feeds have at
//!   least one active subscriber, so a data source only produces what is
//!   being watched.
//!
//! Both are guarded by `parking_lot::RwLock`: mutations take the write lock
//! and are mutually exclusive with the read-side iteration used for dispatch.

mod registry;

use std::collections::HashMap;

use parking_lot::RwLock;

pub use registry::{FeedChanges, FeedRegistry, RegistryStats};

use super::identifiers::{NormalizationScheme, SubscriptionId};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a protocol connection.
pub type ConnectionId = u64;

/// Lifecycle of a subscription entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Subscribe received, feed resolution in progress.
    Pending,
    /// Feed resolved; updates are pushed for this entry.
    Active,
    /// Removed by unsubscribe or connection loss.
    Closed,
}

impl SubscriptionState {
    /// Lower-case name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// One row of the subscription table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    state: SubscriptionState,
    normalization_scheme: Option<NormalizationScheme>,
}

impl SubscriptionEntry {
    const fn new(
        state: SubscriptionState,
        normalization_scheme: Option<NormalizationScheme>,
    ) -> Self {
        Self {
            state,
            normalization_scheme,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Scheme values are delivered in, if any.
    #[must_use]
    pub const fn normalization_scheme(&self) -> Option<&NormalizationScheme> {
        self.normalization_scheme.as_ref()
    }
}

// =============================================================================
// Subscription Table
// =============================================================================

/// Per-connection subscription table.
///
/// Only `Pending` and `Active` entries are stored; removal hands back the
/// entry marked `Closed`.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: RwLock<HashMap<SubscriptionId, SubscriptionEntry>>,
}

impl SubscriptionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a subscribe.
    ///
    /// Inserts a `Pending` entry unless the id is already `Active`, in which
    /// case the active entry is left untouched. Returns the previous state.
    pub fn begin(
        &self,
        id: &SubscriptionId,
        normalization_scheme: Option<NormalizationScheme>,
    ) -> Option<SubscriptionState> {
        let mut entries = self.entries.write();
        let previous = entries.get(id).map(SubscriptionEntry::state);

        if previous != Some(SubscriptionState::Active) {
            entries.insert(
                id.clone(),
                SubscriptionEntry::new(SubscriptionState::Pending, normalization_scheme),
            );
        }

        previous
    }

    /// Promote a subscribe to `Active` under the resolved id.
    ///
    /// Returns `false` if the requested id was removed while resolution was
    /// in flight; no entry is created in that case.
    pub fn activate(
        &self,
        requested: &SubscriptionId,
        resolved: &SubscriptionId,
        normalization_scheme: Option<NormalizationScheme>,
    ) -> bool {
        let mut entries = self.entries.write();

        if !entries.contains_key(requested) {
            return false;
        }
        if requested != resolved {
            entries.remove(requested);
        }

        entries.insert(
            resolved.clone(),
            SubscriptionEntry::new(SubscriptionState::Active, normalization_scheme),
        );
        true
    }

    /// Drop a `Pending` entry after failed resolution.
    ///
    /// Active entries are kept. Returns whether an entry was removed.
    pub fn abandon(&self, id: &SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        match entries.get(id) {
            Some(entry) if entry.state == SubscriptionState::Pending => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Remove an entry. Idempotent: unknown ids return `None`.
    pub fn remove(&self, id: &SubscriptionId) -> Option<SubscriptionEntry> {
        self.entries.write().remove(id).map(|mut entry| {
            entry.state = SubscriptionState::Closed;
            entry
        })
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, id: &SubscriptionId) -> Option<SubscriptionEntry> {
        self.entries.read().get(id).cloned()
    }

    /// Look up an entry only if it is `Active`.
    #[must_use]
    pub fn active_entry(&self, id: &SubscriptionId) -> Option<SubscriptionEntry> {
        self.entries
            .read()
            .get(id)
            .filter(|entry| entry.state == SubscriptionState::Active)
            .cloned()
    }

    /// Whether the id has an `Active` entry.
    #[must_use]
    pub fn is_active(&self, id: &SubscriptionId) -> bool {
        self.active_entry(id).is_some()
    }

    /// All ids with `Active` entries.
    #[must_use]
    pub fn active_ids(&self) -> Vec<SubscriptionId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.state == SubscriptionState::Active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Discard every entry (connection loss).
    ///
    /// Returns the ids that were `Active`.
    pub fn clear(&self) -> Vec<SubscriptionId> {
        self.entries
            .write()
            .drain()
            .filter(|(_, entry)| entry.state == SubscriptionState::Active)
            .map(|(id, _)| id)
            .collect()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Counts per state.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        let entries = self.entries.read();
        let active = entries
            .values()
            .filter(|entry| entry.state == SubscriptionState::Active)
            .count();
        TableStats {
            pending: entries.len() - active,
            active,
        }
    }
}

/// Entry counts for a [`SubscriptionTable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Entries awaiting resolution.
    pub pending: usize,
    /// Entries receiving updates.
    pub active: usize,
}

// =============================================================================
// Tests
// =============================================================================
