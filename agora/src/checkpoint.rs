//! Checkpoints — versioned snapshots of the whole world.
//!
//! A checkpoint captures balances, the full artifact arena, the ID
//! registry, per-agent loop state, and the cumulative API cost. Files are
//! written temp-then-rename so a crash mid-write never leaves a torn
//! checkpoint on disk.

use agora_kernel::Kernel;
use agora_world::RegistryEntry;
use bedrock::{Artifact, Balances, PrincipalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Format version; bumped on incompatible layout changes.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Errors from checkpoint operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Reading or writing the file failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The document was malformed.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The version prefix did not match this kernel.
    #[error("unsupported checkpoint version {found}, expected {expected}")]
    VersionMismatch {
        /// The file's version.
        found: u32,
        /// What this build supports.
        expected: u32,
    },

    /// Taking a consistent snapshot exceeded the configured budget.
    #[error("snapshot timed out")]
    SnapshotTimeout,
}

/// The checkpoint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version. Always first, checked before anything else.
    pub version: u32,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Why it was taken (`shutdown`, `periodic`, operator note…).
    pub reason: String,
    /// Every principal's balances.
    pub balances: BTreeMap<PrincipalId, Balances>,
    /// The full artifact arena, tombstones included.
    pub artifacts: Vec<Artifact>,
    /// The ID registry.
    pub registry: BTreeMap<String, RegistryEntry>,
    /// Loop state per agent, extracted from state artifacts.
    pub agent_states: BTreeMap<String, serde_json::Value>,
    /// Dollars settled through the gateway since genesis.
    pub cumulative_api_cost: rust_decimal::Decimal,
}

impl Checkpoint {
    /// Capture the current world.
    pub async fn capture(
        kernel: &Arc<Kernel>,
        reason: impl Into<String>,
    ) -> Result<Self, CheckpointError> {
        let balances = kernel.ledger().snapshot().await;
        let artifacts = kernel.store().snapshot().await;
        let registry = kernel.registry().snapshot().await;

        // Loop state is stored in `<agent>.state` artifacts; surface it
        // in the document so operators can inspect agents directly.
        let mut agent_states = BTreeMap::new();
        for artifact in &artifacts {
            if let Some(agent) = artifact.id.as_str().strip_suffix(".state")
                && let Ok(state) = serde_json::from_str::<serde_json::Value>(&artifact.content)
            {
                agent_states.insert(agent.to_string(), state);
            }
        }

        Ok(Self {
            version: CHECKPOINT_VERSION,
            timestamp: Utc::now(),
            reason: reason.into(),
            balances,
            artifacts,
            registry,
            agent_states,
            cumulative_api_cost: kernel.gateway().cumulative_cost().await,
        })
    }

    /// Replace the world's state with this checkpoint's.
    pub async fn restore(&self, kernel: &Arc<Kernel>) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                found: self.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        kernel.ledger().restore(self.balances.clone()).await;
        kernel.store().restore(self.artifacts.clone()).await;
        kernel.registry().restore(self.registry.clone()).await;
        kernel
            .gateway()
            .set_cumulative_cost(self.cumulative_api_cost)
            .await;
        tracing::info!(
            artifacts = self.artifacts.len(),
            principals = self.balances.len(),
            "world restored from checkpoint"
        );
        Ok(())
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub async fn save_to(&self, path: &Path) -> Result<(), CheckpointError> {
        let contents = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Load and version-check a checkpoint file.
    pub async fn load_from(path: &Path) -> Result<Self, CheckpointError> {
        let contents = tokio::fs::read_to_string(path).await?;
        // Check the version before deserializing the full document, so a
        // future layout change fails cleanly.
        let probe: serde_json::Value = serde_json::from_str(&contents)?;
        let found = probe["version"].as_u64().unwrap_or(0) as u32;
        if found != CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                found,
                expected: CHECKPOINT_VERSION,
            });
        }
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_gateway::MockProvider;
    use bedrock::{ArtifactKind, Intent, Interface, WriteSpec};
    use rust_decimal::Decimal;

    async fn seeded_kernel() -> Arc<Kernel> {
        let kernel = Kernel::builder(Arc::new(MockProvider::text("", Decimal::ZERO))).build();
        kernel
            .ledger()
            .register("alice".into(), Balances::starting(100, Decimal::ONE, 1 << 20))
            .await
            .unwrap();
        let result = kernel
            .dispatch(Intent::Write {
                principal_id: "alice".into(),
                spec: WriteSpec {
                    artifact_id: "x".into(),
                    content: "hello".into(),
                    kind: ArtifactKind::Data,
                    interface: Some(Interface::data("a note")),
                    code: None,
                    metadata: Default::default(),
                    access_contract_id: None,
                    has_standing: false,
                    has_loop: false,
                },
            })
            .await;
        assert!(result.success);
        kernel
    }

    #[tokio::test]
    async fn capture_restore_round_trips_world_state() {
        let kernel = seeded_kernel().await;
        let checkpoint = Checkpoint::capture(&kernel, "test").await.unwrap();

        // A fresh kernel restored from the checkpoint serves the same reads.
        let other = Kernel::builder(Arc::new(MockProvider::text("", Decimal::ZERO))).build();
        checkpoint.restore(&other).await.unwrap();

        let result = other
            .dispatch(Intent::Read {
                principal_id: "alice".into(),
                artifact_id: "x".into(),
            })
            .await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["content"], "hello");
        assert_eq!(
            other.ledger().balances(&"alice".into()).await.unwrap().scrip,
            100
        );
    }

    #[tokio::test]
    async fn files_round_trip_and_check_versions() {
        let kernel = seeded_kernel().await;
        let checkpoint = Checkpoint::capture(&kernel, "shutdown").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.checkpoint.json");
        checkpoint.save_to(&path).await.unwrap();

        let loaded = Checkpoint::load_from(&path).await.unwrap();
        assert_eq!(loaded, checkpoint);

        // A tampered version is refused.
        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["version"] = serde_json::json!(99);
        std::fs::write(&path, doc.to_string()).unwrap();
        let err = Checkpoint::load_from(&path).await.unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::VersionMismatch { found: 99, .. }
        ));
    }
}
