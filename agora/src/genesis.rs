//! Genesis bootstrap — the artifacts the world starts with.
//!
//! The loader applies a manifest through ordinary `write` dispatches as
//! the boot principal, so genesis artifacts are indistinguishable from
//! user-created ones and carry no kernel privilege. Balances are seeded
//! on the ledger before the write (the write keeps existing accounts),
//! and capabilities are granted afterwards through the kernel's only
//! capability path.

use agora_kernel::Kernel;
use bedrock::{
    ArtifactId, ArtifactKind, Balances, Capability, CodeRef, Intent, Interface, PrincipalId,
    WriteSpec,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// The principal the loader acts as.
pub const BOOT_PRINCIPAL: &str = "genesis";

/// Errors from the genesis loader.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GenesisError {
    /// A manifest entry failed to apply.
    #[error("entry '{id}' failed: {message}")]
    EntryFailed {
        /// The entry's artifact id.
        id: String,
        /// The dispatcher's message.
        message: String,
    },

    /// Seeding a principal failed.
    #[error("seeding failed: {0}")]
    SeedFailed(String),
}

/// One artifact in the genesis manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisEntry {
    /// Artifact id.
    pub id: ArtifactId,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Content (inline).
    #[serde(default)]
    pub content: String,
    /// Interface descriptor.
    pub interface: Interface,
    /// Program binding, when the artifact carries code.
    #[serde(default)]
    pub code: Option<CodeRef>,
    /// Access handler reference.
    #[serde(default)]
    pub access_contract_id: Option<ArtifactId>,
    /// Declared capabilities, granted after the write.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Whether the artifact is a principal.
    #[serde(default)]
    pub has_standing: bool,
    /// Whether the loop manager schedules it.
    #[serde(default)]
    pub has_loop: bool,
    /// Metadata; the loader adds `genesis: true`.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Starting scrip, seeded before the write.
    #[serde(default)]
    pub starting_scrip: i64,
    /// Starting dollar budget.
    #[serde(default)]
    pub starting_llm_budget: Decimal,
    /// Starting disk quota.
    #[serde(default)]
    pub starting_disk_quota: i64,
}

/// The boot manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenesisManifest {
    /// Artifacts to create, in order (handlers before their dependents).
    pub entries: Vec<GenesisEntry>,
}

impl GenesisManifest {
    /// The built-in manifest: the three access-handler contracts and the
    /// handbook. Escrow, mint, and debt contracts are user code layered
    /// on top by the embedding process.
    #[must_use]
    pub fn builtin() -> Self {
        let handler = |id: &str, program: &str, description: &str| GenesisEntry {
            id: id.into(),
            kind: ArtifactKind::Contract,
            content: String::new(),
            interface: Interface {
                description: description.into(),
                data_type: bedrock::DataType::Contract,
                methods: vec![],
                linearization: None,
                examples: vec![],
                has_standing: false,
            },
            code: Some(CodeRef::new(program)),
            access_contract_id: None,
            capabilities: vec![],
            has_standing: false,
            has_loop: false,
            metadata: BTreeMap::new(),
            starting_scrip: 0,
            starting_llm_budget: Decimal::ZERO,
            starting_disk_quota: 0,
        };

        Self {
            entries: vec![
                handler(
                    "contract.open",
                    "open_access",
                    "Allows any principal to act on the target",
                ),
                handler(
                    "contract.creator-only",
                    "creator_only",
                    "Only the target's creator may act",
                ),
                handler(
                    "contract.authorized-writer",
                    "authorized_writer",
                    "Open reads; writes require the authorized_writer metadata key",
                ),
                GenesisEntry {
                    id: "handbook".into(),
                    kind: ArtifactKind::Data,
                    content: "Welcome to the world. Everything you can see and touch is an \
                              artifact. Act through intents; pay in scrip; your LLM budget \
                              is finite. Read before you write."
                        .into(),
                    interface: Interface::data("Orientation text for new agents"),
                    code: None,
                    access_contract_id: Some("contract.open".into()),
                    capabilities: vec![],
                    has_standing: false,
                    has_loop: false,
                    metadata: BTreeMap::new(),
                    starting_scrip: 0,
                    starting_llm_budget: Decimal::ZERO,
                    starting_disk_quota: 0,
                },
            ],
        }
    }
}

/// Apply a manifest to a freshly built kernel.
pub async fn load(kernel: &Arc<Kernel>, manifest: &GenesisManifest) -> Result<(), GenesisError> {
    // The boot principal pays the disk for every genesis artifact.
    let boot = PrincipalId::new(BOOT_PRINCIPAL);
    if kernel.ledger().ensure_account(&boot).await {
        kernel
            .ledger()
            .credit_disk(&boot, 64 << 20)
            .await
            .map_err(|e| GenesisError::SeedFailed(e.to_string()))?;
        kernel
            .registry()
            .register(BOOT_PRINCIPAL, ArtifactKind::Data, true)
            .await
            .map_err(|e| GenesisError::SeedFailed(e.to_string()))?;
    }

    for entry in &manifest.entries {
        // Seed balances first; the artifact write keeps existing accounts.
        if entry.has_standing {
            let principal = PrincipalId::from(&entry.id);
            if !kernel.ledger().contains(&principal).await {
                kernel
                    .ledger()
                    .register(
                        principal,
                        Balances::starting(
                            entry.starting_scrip,
                            entry.starting_llm_budget,
                            entry.starting_disk_quota,
                        ),
                    )
                    .await
                    .map_err(|e| GenesisError::SeedFailed(e.to_string()))?;
            }
        }

        let mut metadata = entry.metadata.clone();
        metadata.insert("genesis".into(), json!(true));
        let result = kernel
            .dispatch(Intent::Write {
                principal_id: boot.clone(),
                spec: WriteSpec {
                    artifact_id: entry.id.clone(),
                    content: entry.content.clone(),
                    kind: entry.kind,
                    interface: Some(entry.interface.clone()),
                    code: entry.code.clone(),
                    metadata,
                    access_contract_id: entry.access_contract_id.clone(),
                    has_standing: entry.has_standing,
                    has_loop: entry.has_loop,
                },
            })
            .await;
        if !result.success {
            return Err(GenesisError::EntryFailed {
                id: entry.id.to_string(),
                message: result.message,
            });
        }

        for capability in &entry.capabilities {
            kernel
                .grant_capability(&entry.id, capability.clone())
                .await
                .map_err(|e| GenesisError::SeedFailed(e.to_string()))?;
        }
        tracing::debug!(id = %entry.id, "genesis artifact loaded");
    }
    Ok(())
}
