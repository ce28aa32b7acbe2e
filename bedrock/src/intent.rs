//! The closed intent set — every state mutation is one of these.

use crate::artifact::{ArtifactKind, CodeRef, Interface};
use crate::id::{ArtifactId, PrincipalId};
use crate::resource::ResourceKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An amount in a transfer: integer for scrip/disk, decimal for dollars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    /// Integer units (scrip, disk bytes).
    Units(i64),
    /// Dollar amount (LLM budget).
    Dollars(Decimal),
}

impl Amount {
    /// The amount as a decimal, for uniform comparison.
    #[must_use]
    pub fn as_decimal(self) -> Decimal {
        match self {
            Self::Units(n) => Decimal::from(n),
            Self::Dollars(d) => d,
        }
    }

    /// Whether the amount is strictly positive.
    #[must_use]
    pub fn is_positive(self) -> bool {
        self.as_decimal() > Decimal::ZERO
    }
}

/// Read-only catalogue queries.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// List artifacts (filterable).
    Artifacts,
    /// List principals with standing.
    Principals,
    /// Balances of one principal (the filter's `principal_id`, defaulting
    /// to the caller).
    Balances,
    /// Events since a sequence cursor.
    Events,
}

/// Filter for `query` intents. All fields optional; unknown combinations
/// simply match nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Restrict to one artifact kind.
    #[serde(default)]
    pub kind: Option<ArtifactKind>,
    /// Restrict to artifacts created by this principal.
    #[serde(default)]
    pub created_by: Option<PrincipalId>,
    /// Require all of these tags (metadata key `tags`, array of strings).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Include soft-deleted tombstones (default: excluded).
    #[serde(default)]
    pub include_deleted: bool,
    /// For `Balances`: whose balances (defaults to the caller).
    #[serde(default)]
    pub principal_id: Option<PrincipalId>,
    /// For `Events`: return events with `seq > since_seq`.
    #[serde(default)]
    pub since_seq: Option<u64>,
    /// Cap on returned items.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Structured edit operations on the caller's own system prompt artifact.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PromptEdit {
    /// Append text to the end of the prompt.
    Append {
        /// Text to append.
        text: String,
    },
    /// Prepend text after the protected prefix.
    Prepend {
        /// Text to prepend.
        text: String,
    },
    /// Replace the section delimited by a `## {section}` heading.
    ReplaceSection {
        /// Heading of the section to replace.
        section: String,
        /// Replacement body.
        text: String,
    },
    /// Restore the prompt to its initial content.
    Reset,
}

/// The fields of a `write` intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteSpec {
    /// Target artifact (created if absent).
    pub artifact_id: ArtifactId,
    /// New content.
    #[serde(default)]
    pub content: String,
    /// Kind of the artifact (required on create, checked on update).
    pub kind: ArtifactKind,
    /// Interface descriptor (required on create).
    #[serde(default)]
    pub interface: Option<Interface>,
    /// Executable logic reference.
    #[serde(default)]
    pub code: Option<CodeRef>,
    /// Initial/updated metadata entries (merged on update).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Access handler for the new artifact.
    #[serde(default)]
    pub access_contract_id: Option<ArtifactId>,
    /// Register the artifact as a principal.
    #[serde(default)]
    pub has_standing: bool,
    /// Schedule the artifact on the loop manager.
    #[serde(default)]
    pub has_loop: bool,
}

/// An intent: who wants to do what. The closed set the dispatcher accepts.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Intent {
    /// Return content + interface, subject to the access check.
    Read {
        /// Acting principal.
        principal_id: PrincipalId,
        /// Target artifact.
        artifact_id: ArtifactId,
    },
    /// Create or update an artifact. Creation charges disk quota.
    Write {
        /// Acting principal.
        principal_id: PrincipalId,
        /// What to write.
        #[serde(flatten)]
        spec: WriteSpec,
    },
    /// Execute the target's code in the sandbox.
    Invoke {
        /// Acting principal.
        principal_id: PrincipalId,
        /// Target artifact.
        artifact_id: ArtifactId,
        /// Method name; defaults to the target's primary operation.
        #[serde(default)]
        method: Option<String>,
        /// Positional/keyword arguments as one JSON value.
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Move value between principals. Fails if insufficient.
    Transfer {
        /// Paying principal.
        principal_id: PrincipalId,
        /// Receiving principal.
        to: PrincipalId,
        /// How much.
        amount: Amount,
        /// Which stock to move.
        resource: ResourceKind,
    },
    /// Soft-delete via the permission handler.
    Delete {
        /// Acting principal.
        principal_id: PrincipalId,
        /// Target artifact.
        artifact_id: ArtifactId,
    },
    /// Read-only catalogue query.
    Query {
        /// Acting principal.
        principal_id: PrincipalId,
        /// What to list.
        query_type: QueryKind,
        /// Optional filter.
        #[serde(default)]
        filter: QueryFilter,
    },
    /// No state mutation; logged.
    Noop {
        /// Acting principal.
        principal_id: PrincipalId,
        /// Optional explanation, recorded in the event.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Mutate `metadata` only. Reserved keys are refused by the kernel.
    UpdateMetadata {
        /// Acting principal.
        principal_id: PrincipalId,
        /// Target artifact.
        artifact_id: ArtifactId,
        /// Key/value entries to merge; a `null` value removes the key.
        updates: BTreeMap<String, serde_json::Value>,
    },
    /// Structured edit of the caller's own prompt artifact.
    ModifySystemPrompt {
        /// Acting principal (and prompt owner).
        principal_id: PrincipalId,
        /// The edit to apply.
        #[serde(flatten)]
        edit: PromptEdit,
    },
}

impl Intent {
    /// The acting principal, present on every intent.
    #[must_use]
    pub fn principal(&self) -> &PrincipalId {
        match self {
            Self::Read { principal_id, .. }
            | Self::Write { principal_id, .. }
            | Self::Invoke { principal_id, .. }
            | Self::Transfer { principal_id, .. }
            | Self::Delete { principal_id, .. }
            | Self::Query { principal_id, .. }
            | Self::Noop { principal_id, .. }
            | Self::UpdateMetadata { principal_id, .. }
            | Self::ModifySystemPrompt { principal_id, .. } => principal_id,
        }
    }

    /// The target artifact, when the intent has one.
    #[must_use]
    pub fn target(&self) -> Option<&ArtifactId> {
        match self {
            Self::Read { artifact_id, .. }
            | Self::Invoke { artifact_id, .. }
            | Self::Delete { artifact_id, .. }
            | Self::UpdateMetadata { artifact_id, .. } => Some(artifact_id),
            Self::Write { spec, .. } => Some(&spec.artifact_id),
            _ => None,
        }
    }

    /// The operation name handed to access handlers.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Invoke { .. } => "invoke",
            Self::Transfer { .. } => "transfer",
            Self::Delete { .. } => "delete",
            Self::Query { .. } => "query",
            Self::Noop { .. } => "noop",
            Self::UpdateMetadata { .. } => "update_metadata",
            Self::ModifySystemPrompt { .. } => "modify_system_prompt",
        }
    }
}
