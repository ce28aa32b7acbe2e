//! The ID registry — one namespace for every entity kind.

use bedrock::{ArtifactKind, WorldError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// What a registered ID refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Kind of the artifact behind the ID.
    pub kind: ArtifactKind,
    /// Whether the entity is also a principal.
    pub has_standing: bool,
}

/// Maps every live ID to what it is.
///
/// Registration is enforced on every artifact create and principal spawn;
/// a duplicate in *either* population fails with an ID collision. IDs are
/// never recycled — soft-deleted artifacts keep their entry.
pub struct IdRegistry {
    entries: RwLock<BTreeMap<String, RegistryEntry>>,
}

impl IdRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Claim an ID.
    ///
    /// # Errors
    ///
    /// `IdCollision` if the ID exists, regardless of which population
    /// (artifact or principal) claimed it first.
    pub async fn register(
        &self,
        id: &str,
        kind: ArtifactKind,
        has_standing: bool,
    ) -> Result<(), WorldError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(id) {
            return Err(WorldError::IdCollision(id.to_string()));
        }
        entries.insert(id.to_string(), RegistryEntry { kind, has_standing });
        Ok(())
    }

    /// Look up an ID.
    pub async fn get(&self, id: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(id).copied()
    }

    /// Whether the ID is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Upgrade an existing entry to standing (an artifact that later
    /// becomes a principal keeps its ID).
    pub async fn grant_standing(&self, id: &str) -> Result<(), WorldError> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.has_standing = true;
                Ok(())
            }
            None => Err(WorldError::InvalidOperation(format!(
                "cannot grant standing to unregistered id {id}"
            ))),
        }
    }

    /// Drop a claim made during a creation that was rolled back before the
    /// artifact existed. Live or tombstoned IDs are never released.
    pub async fn release(&self, id: &str) {
        self.entries.write().await.remove(id);
    }

    /// Snapshot for checkpointing.
    pub async fn snapshot(&self) -> BTreeMap<String, RegistryEntry> {
        self.entries.read().await.clone()
    }

    /// Restore from a checkpoint snapshot.
    pub async fn restore(&self, entries: BTreeMap<String, RegistryEntry>) {
        *self.entries.write().await = entries;
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn artifact_then_principal_with_same_id_collides() {
        let registry = IdRegistry::new();
        registry
            .register("foo", ArtifactKind::Data, false)
            .await
            .unwrap();
        let err = registry
            .register("foo", ArtifactKind::Agent, true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), bedrock::ErrorCode::IdCollision);
    }

    #[tokio::test]
    async fn standing_can_be_granted_later() {
        let registry = IdRegistry::new();
        registry
            .register("foo", ArtifactKind::Contract, false)
            .await
            .unwrap();
        registry.grant_standing("foo").await.unwrap();
        assert!(registry.get("foo").await.unwrap().has_standing);
    }

    #[tokio::test]
    async fn lookup_reports_kind() {
        let registry = IdRegistry::new();
        registry
            .register("w", ArtifactKind::Workflow, false)
            .await
            .unwrap();
        assert_eq!(registry.get("w").await.unwrap().kind, ArtifactKind::Workflow);
        assert!(registry.get("missing").await.is_none());
    }
}
