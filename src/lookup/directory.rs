//! Participant directories.
//!
//! [`ParticipantDirectory`] is the seam between the lookup service and
//! whatever actually answers queries. [`MockDirectory`] answers from an
//! in-memory table and never touches the network.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::endpoint::{LookupResult, ParticipantKey, PeppolEndpoint};
use crate::error::HarnessError;

/// Resolves participants to delivery endpoints.
///
/// Implementations must report unknown participants as
/// [`LookupResult::NotFound`], reserving `Err` for failures of the
/// directory itself.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync + fmt::Debug {
    /// Resolves `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Lookup`] if the directory cannot answer.
    async fn lookup(&self, key: &ParticipantKey) -> Result<LookupResult, HarnessError>;

    /// Address of the directory, if it has one.
    fn endpoint(&self) -> Option<String> {
        None
    }
}

/// In-memory directory populated explicitly by tests.
#[derive(Debug, Default)]
pub struct MockDirectory {
    entries: RwLock<HashMap<ParticipantKey, PeppolEndpoint>>,
}

impl MockDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the endpoint returned for `key`.
    pub async fn insert(&self, key: ParticipantKey, endpoint: PeppolEndpoint) {
        self.entries.write().await.insert(key, endpoint);
    }

    /// Forgets every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of registered participants.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ParticipantDirectory for MockDirectory {
    async fn lookup(&self, key: &ParticipantKey) -> Result<LookupResult, HarnessError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .cloned()
            .map_or_else(LookupResult::not_found, LookupResult::Found))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_lookup_clear() {
        let dir = MockDirectory::new();
        let Ok(key) = ParticipantKey::siren("123456789") else {
            panic!("key");
        };
        let endpoint = PeppolEndpoint::new("https://ap.test.fr/as4", "MOCK_CERT", "peppol-transport-as4-v2_0");

        assert!(dir.is_empty().await);
        dir.insert(key.clone(), endpoint.clone()).await;
        assert_eq!(dir.len().await, 1);
        assert!(matches!(dir.lookup(&key).await, Ok(LookupResult::Found(e)) if e == endpoint));

        dir.clear().await;
        assert!(matches!(
            dir.lookup(&key).await,
            Ok(LookupResult::NotFound { .. })
        ));
    }
}
