//! Type-safe PA instance identifier.
//!
//! [`PaId`] is a newtype wrapper around [`uuid::Uuid`] (v4) so that PA
//! identities cannot be confused with other UUIDs flowing through the
//! harness (broker client names, message ids).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one PA instance.
///
/// Generated once when a [`crate::context::PaContext`] is constructed and
/// immutable thereafter. Used in tracing spans, info snapshots and the
/// broker client name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaId(uuid::Uuid);

impl PaId {
    /// Creates a new random `PaId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `PaId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// First eight hex digits, used in compact log lines.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string().chars().take(8).collect()
    }
}

impl Default for PaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for PaId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}
