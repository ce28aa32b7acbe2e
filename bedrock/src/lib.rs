#![deny(missing_docs)]
//! # bedrock — protocol vocabulary for the agora simulation kernel
//!
//! This crate defines the data language every other agora crate speaks:
//!
//! | Area | Types |
//! |------|-------|
//! | Identity | [`ArtifactId`], [`PrincipalId`] |
//! | World | [`Artifact`], [`Interface`], [`CodeRef`], [`Capability`] |
//! | Requests | [`Intent`], [`QueryKind`], [`PromptEdit`] |
//! | Replies | [`ActionResult`], [`ActionError`] |
//! | Money | [`Balances`], [`ResourceKind`], [`ResourceUsage`] |
//! | Permission | [`PermissionResult`] |
//! | History | [`KernelEvent`], [`EventKind`], [`EventFilter`] |
//! | Failure | [`ErrorCode`], [`ErrorCategory`], per-layer error enums |
//!
//! ## Design principle
//!
//! Everything here is *data* — the behavioral seams (the kernel's program
//! registry, the gateway's provider trait) live with the crates that
//! execute them. Cross-references between artifacts are always IDs
//! resolved through the store, never pointers, which keeps the world
//! checkpointable and cycle-free.
//!
//! ## Dependency notes
//!
//! `serde_json::Value` is used for extension payloads (metadata, schemas,
//! event data) — JSON is the interchange format agents see, so fighting it
//! with generics would buy nothing. Dollar amounts are `rust_decimal`
//! (exact, serde-str); scrip is `i64` with a non-negative invariant held
//! by the ledger.

pub mod action;
pub mod artifact;
pub mod error;
pub mod event;
pub mod id;
pub mod intent;
pub mod permission;
pub mod resource;

pub use action::{ActionError, ActionResult};
pub use artifact::{Artifact, ArtifactKind, Capability, CodeRef, DataType, Interface, MethodSpec};
pub use error::{ErrorCategory, ErrorCode, EventLogError, ExecError, GatewayError, WorldError};
pub use event::{EventDraft, EventFilter, EventKind, KernelEvent};
pub use id::{ArtifactId, PrincipalId};
pub use intent::{Amount, Intent, PromptEdit, QueryFilter, QueryKind, WriteSpec};
pub use permission::PermissionResult;
pub use resource::{Balances, ResourceKind, ResourceUsage};
