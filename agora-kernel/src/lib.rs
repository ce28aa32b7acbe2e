#![deny(missing_docs)]
//! The agora kernel — dispatcher, permission layer, sandboxed executor.
//!
//! Everything that mutates the world flows through [`Kernel::dispatch`]:
//! validation, the access-handler call-out, rate and budget metering, the
//! effect itself, and exactly one `action` event per dispatch. Artifact
//! code runs as registered [`Program`]s inside a [`Sandbox`] with injected
//! [`KernelState`]/[`KernelActions`] handles and a verified caller; nested
//! dispatches share one depth budget so recursion ends in
//! `invoke_too_deep`, not a blown stack.
//!
//! Genesis services, access handlers, and agent behaviors are all just
//! programs bound through an artifact's `code` field — none of them has
//! kernel privilege.

pub mod config;
pub mod dispatcher;
pub mod permission;
pub mod sandbox;
pub mod validate;

pub use config::{ContractDefault, ExecutorConfig, InterfaceValidation, PromptConfig};
pub use dispatcher::{Kernel, KernelBuilder};
pub use permission::{register_builtin_handlers, AuthorizedWriter, CreatorOnly, OpenAccess};
pub use sandbox::{KernelActions, KernelState, Program, ProgramFuture, ProgramRegistry, Sandbox};
