//! The artifact model — the universal unit everything in the world is made of.

use crate::id::{ArtifactId, PrincipalId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What an artifact is. One shared ID namespace covers all kinds.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Inert content.
    Data,
    /// Carries code; must declare interface methods.
    Executable,
    /// A principal with an autonomous loop.
    Agent,
    /// Code that adjudicates access or holds obligations.
    Contract,
    /// Declares an event filter and a callback artifact.
    Trigger,
    /// An ordered list of steps run inside an agent's loop.
    Workflow,
    /// A lightweight reactive behavior.
    Reflex,
}

/// How an interface describes its data surface.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Plain readable content.
    Data,
    /// Invokable service.
    Service,
    /// An autonomous agent.
    Agent,
    /// A contract (access handler, obligation).
    Contract,
}

/// One invokable method on an executable artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSpec {
    /// Method name, matched against the `invoke` intent's `method` field.
    pub name: String,
    /// JSON Schema for the argument object.
    pub input_schema: serde_json::Value,
    /// JSON Schema for the return value.
    pub output_schema: serde_json::Value,
    /// Advertised scrip cost of calling this method.
    #[serde(default)]
    pub cost: i64,
    /// Error codes this method is known to return.
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Required descriptor on every artifact.
///
/// `description` and `data_type` are mandatory; `methods` is mandatory for
/// `kind = executable` (enforced by the store on write).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    /// Human-readable summary of what the artifact is for.
    pub description: String,
    /// The data surface category.
    pub data_type: DataType,
    /// Invokable methods, when the artifact carries code.
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
    /// Optional text template used to linearize the artifact for prompts.
    #[serde(default)]
    pub linearization: Option<String>,
    /// Optional usage examples.
    #[serde(default)]
    pub examples: Vec<String>,
    /// Whether this artifact may hold balances and be charged.
    #[serde(default)]
    pub has_standing: bool,
}

impl Interface {
    /// Minimal data interface with just a description.
    pub fn data(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            data_type: DataType::Data,
            methods: vec![],
            linearization: None,
            examples: vec![],
            has_standing: false,
        }
    }

    /// Service interface with the given methods.
    pub fn service(description: impl Into<String>, methods: Vec<MethodSpec>) -> Self {
        Self {
            description: description.into(),
            data_type: DataType::Service,
            methods,
            linearization: None,
            examples: vec![],
            has_standing: false,
        }
    }

    /// Look up a method by name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Reference to executable logic.
///
/// Artifact "code" names an entry in the kernel's program registry plus an
/// opaque configuration value the program receives on every call. Genesis
/// artifacts bind well-known programs; embedders register their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRef {
    /// Name of the registered program.
    pub program: String,
    /// Program-specific configuration, passed through verbatim.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl CodeRef {
    /// Reference a program with no configuration.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            config: serde_json::Value::Null,
        }
    }
}

/// Kernel-granted permissions an artifact may hold.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// May call the LLM gateway from inside the sandbox.
    CanCallLlm,
    /// Future capabilities, named at the manifest level.
    Custom(String),
}

/// The universal entity. Everything the world contains is one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique across *all* entity kinds (single namespace).
    pub id: ArtifactId,
    /// Discriminant.
    pub kind: ArtifactKind,
    /// Opaque content; may be empty.
    #[serde(default)]
    pub content: String,
    /// Executable logic, present when the kind carries code.
    #[serde(default)]
    pub code: Option<CodeRef>,
    /// Required descriptor.
    pub interface: Interface,
    /// Immutable historical fact: the principal that produced this artifact.
    pub created_by: PrincipalId,
    /// Artifact whose code adjudicates access; absent means the boot-time
    /// default policy applies.
    #[serde(default)]
    pub access_contract_id: Option<ArtifactId>,
    /// Kernel-granted permissions.
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    /// May hold balances and be charged.
    #[serde(default)]
    pub has_standing: bool,
    /// Scheduled by the loop manager. Implies `has_standing`.
    #[serde(default)]
    pub has_loop: bool,
    /// Open key/value map. Some keys carry meaning to specific handlers
    /// (`authorized_writer`, `recipient`, `tags`); the kernel interprets
    /// none of them except the reserved-key rule on `update_metadata`.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Soft-delete tombstone fields.
    #[serde(default)]
    pub deleted: bool,
    /// When the artifact was deleted.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Who deleted it.
    #[serde(default)]
    pub deleted_by: Option<PrincipalId>,
}

impl Artifact {
    /// Create a minimal data artifact.
    pub fn data(
        id: impl Into<ArtifactId>,
        created_by: impl Into<PrincipalId>,
        content: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ArtifactKind::Data,
            content: content.into(),
            code: None,
            interface: Interface::data(description),
            created_by: created_by.into(),
            access_contract_id: None,
            capabilities: BTreeSet::new(),
            has_standing: false,
            has_loop: false,
            metadata: BTreeMap::new(),
            deleted: false,
            deleted_at: None,
            deleted_by: None,
        }
    }

    /// Whether this artifact has the given capability.
    #[must_use]
    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// The byte size charged against disk quota on create.
    #[must_use]
    pub fn disk_size(&self) -> i64 {
        let code_len = self
            .code
            .as_ref()
            .map(|c| c.program.len() + c.config.to_string().len())
            .unwrap_or(0);
        (self.content.len() + code_len) as i64
    }

    /// A tagged string value from metadata, if present.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Turn this artifact into a tombstone.
    pub fn mark_deleted(&mut self, by: PrincipalId, at: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_at = Some(at);
        self.deleted_by = Some(by);
    }

    /// Structural invariants checked on every write.
    ///
    /// Returns a human-readable violation if the artifact is malformed:
    /// executables must declare methods, loops require standing, and the
    /// description must be non-empty.
    #[must_use]
    pub fn validate(&self) -> Option<String> {
        if self.interface.description.is_empty() {
            return Some("interface.description is required".into());
        }
        if self.kind == ArtifactKind::Executable && self.interface.methods.is_empty() {
            return Some("executable artifacts must declare interface.methods".into());
        }
        if self.has_loop && !self.has_standing {
            return Some("has_loop requires has_standing".into());
        }
        None
    }
}
