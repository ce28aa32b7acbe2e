//! The artifact store — an arena of artifacts owned by ID.
//!
//! Cross-references between artifacts are always IDs resolved through this
//! store, never pointers. Each artifact sits behind its own `RwLock` so
//! writes to the same artifact are linearized while writes to different
//! artifacts proceed independently.

use bedrock::{Artifact, ArtifactId, PrincipalId, WorldError};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Arena + index over every artifact in the world.
///
/// Soft-deleted artifacts stay in the arena as tombstones: readable,
/// excluded from listings by default, refused for writes and invokes.
/// The kernel never hard-deletes.
pub struct ArtifactStore {
    arena: RwLock<BTreeMap<ArtifactId, Arc<RwLock<Artifact>>>>,
}

impl ArtifactStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(BTreeMap::new()),
        }
    }

    async fn slot(&self, id: &ArtifactId) -> Result<Arc<RwLock<Artifact>>, WorldError> {
        self.arena
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WorldError::UnknownArtifact(id.clone()))
    }

    /// Whether an artifact (live or tombstoned) exists under this ID.
    pub async fn contains(&self, id: &ArtifactId) -> bool {
        self.arena.read().await.contains_key(id)
    }

    /// Insert a new artifact.
    ///
    /// # Errors
    ///
    /// `IdCollision` if the ID is taken; `InvalidOperation` if the artifact
    /// violates its structural invariants.
    pub async fn insert(&self, artifact: Artifact) -> Result<(), WorldError> {
        if let Some(violation) = artifact.validate() {
            return Err(WorldError::InvalidOperation(violation));
        }
        let mut arena = self.arena.write().await;
        if arena.contains_key(&artifact.id) {
            return Err(WorldError::IdCollision(artifact.id.to_string()));
        }
        arena.insert(artifact.id.clone(), Arc::new(RwLock::new(artifact)));
        Ok(())
    }

    /// A clone of the artifact, tombstone or not. Callers that must not see
    /// tombstones check `deleted` themselves — tombstones stay readable so
    /// deletion is observable.
    pub async fn get(&self, id: &ArtifactId) -> Result<Artifact, WorldError> {
        let slot = self.slot(id).await?;
        let guard = slot.read().await;
        Ok(guard.clone())
    }

    /// A clone of the artifact, failing on tombstones.
    pub async fn get_live(&self, id: &ArtifactId) -> Result<Artifact, WorldError> {
        let artifact = self.get(id).await?;
        if artifact.deleted {
            return Err(WorldError::ArtifactDeleted(id.clone()));
        }
        Ok(artifact)
    }

    /// Mutate an artifact under its write lock.
    ///
    /// The mutation runs only on live artifacts; `created_by` is restored
    /// afterwards so no mutation path can rewrite history. Returns whatever
    /// the closure returns.
    pub async fn update<F, T>(&self, id: &ArtifactId, mutate: F) -> Result<T, WorldError>
    where
        F: FnOnce(&mut Artifact) -> T,
    {
        let slot = self.slot(id).await?;
        let mut guard = slot.write().await;
        if guard.deleted {
            return Err(WorldError::ArtifactDeleted(id.clone()));
        }
        let created_by = guard.created_by.clone();
        let out = mutate(&mut guard);
        guard.created_by = created_by;
        if let Some(violation) = guard.validate() {
            return Err(WorldError::InvalidOperation(violation));
        }
        Ok(out)
    }

    /// Soft-delete an artifact, stamping the tombstone fields.
    pub async fn mark_deleted(
        &self,
        id: &ArtifactId,
        by: &PrincipalId,
    ) -> Result<(), WorldError> {
        let slot = self.slot(id).await?;
        let mut guard = slot.write().await;
        if guard.deleted {
            return Err(WorldError::ArtifactDeleted(id.clone()));
        }
        guard.mark_deleted(by.clone(), Utc::now());
        Ok(())
    }

    /// All artifacts passing the given predicate. Tombstones are handed to
    /// the predicate too; listing policy (exclude-by-default) belongs to
    /// the query layer.
    pub async fn select<F>(&self, keep: F) -> Vec<Artifact>
    where
        F: Fn(&Artifact) -> bool,
    {
        let arena = self.arena.read().await;
        let mut out = Vec::new();
        for slot in arena.values() {
            let guard = slot.read().await;
            if keep(&guard) {
                out.push(guard.clone());
            }
        }
        out
    }

    /// Number of artifacts, tombstones included.
    pub async fn len(&self) -> usize {
        self.arena.read().await.len()
    }

    /// Whether the arena is empty.
    pub async fn is_empty(&self) -> bool {
        self.arena.read().await.is_empty()
    }

    /// Snapshot the full arena for checkpointing.
    pub async fn snapshot(&self) -> Vec<Artifact> {
        let arena = self.arena.read().await;
        let mut out = Vec::with_capacity(arena.len());
        for slot in arena.values() {
            out.push(slot.read().await.clone());
        }
        out
    }

    /// Replace the arena from a checkpoint snapshot.
    pub async fn restore(&self, artifacts: Vec<Artifact>) {
        let mut arena = self.arena.write().await;
        arena.clear();
        for artifact in artifacts {
            arena.insert(artifact.id.clone(), Arc::new(RwLock::new(artifact)));
        }
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bedrock::ArtifactKind;

    fn note(id: &str) -> Artifact {
        Artifact::data(id, "alice", "hello", "a note")
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = ArtifactStore::new();
        store.insert(note("x")).await.unwrap();
        let back = store.get(&"x".into()).await.unwrap();
        assert_eq!(back.content, "hello");
        assert_eq!(back.kind, ArtifactKind::Data);
    }

    #[tokio::test]
    async fn duplicate_insert_collides() {
        let store = ArtifactStore::new();
        store.insert(note("x")).await.unwrap();
        let err = store.insert(note("x")).await.unwrap_err();
        assert_eq!(err.code(), bedrock::ErrorCode::IdCollision);
    }

    #[tokio::test]
    async fn update_cannot_rewrite_created_by() {
        let store = ArtifactStore::new();
        store.insert(note("x")).await.unwrap();
        store
            .update(&"x".into(), |a| {
                a.created_by = PrincipalId::new("mallory");
                a.content = "patched".into();
            })
            .await
            .unwrap();
        let back = store.get(&"x".into()).await.unwrap();
        assert_eq!(back.created_by.as_str(), "alice");
        assert_eq!(back.content, "patched");
    }

    #[tokio::test]
    async fn tombstones_read_but_refuse_writes() {
        let store = ArtifactStore::new();
        store.insert(note("x")).await.unwrap();
        store.mark_deleted(&"x".into(), &"alice".into()).await.unwrap();

        let tombstone = store.get(&"x".into()).await.unwrap();
        assert!(tombstone.deleted);
        assert_eq!(tombstone.deleted_by.as_ref().unwrap().as_str(), "alice");
        assert!(tombstone.deleted_at.is_some());

        let err = store.update(&"x".into(), |a| a.content.clear()).await.unwrap_err();
        assert_eq!(err.code(), bedrock::ErrorCode::Deleted);

        let err = store.get_live(&"x".into()).await.unwrap_err();
        assert_eq!(err.code(), bedrock::ErrorCode::Deleted);

        // Double delete is also refused.
        let err = store
            .mark_deleted(&"x".into(), &"bob".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), bedrock::ErrorCode::Deleted);
    }

    #[tokio::test]
    async fn select_sees_tombstones_when_asked() {
        let store = ArtifactStore::new();
        store.insert(note("a")).await.unwrap();
        store.insert(note("b")).await.unwrap();
        store.mark_deleted(&"b".into(), &"alice".into()).await.unwrap();

        let live = store.select(|a| !a.deleted).await;
        assert_eq!(live.len(), 1);
        let all = store.select(|_| true).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_restore_round_trips() {
        let store = ArtifactStore::new();
        store.insert(note("a")).await.unwrap();
        store.insert(note("b")).await.unwrap();
        let snap = store.snapshot().await;

        let other = ArtifactStore::new();
        other.restore(snap).await;
        assert_eq!(other.len().await, 2);
        assert_eq!(other.get(&"a".into()).await.unwrap().content, "hello");
    }
}
