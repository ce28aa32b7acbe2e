//! The permission layer — access handlers as ordinary programs.
//!
//! An artifact's `access_contract_id` names another artifact whose code
//! adjudicates operations on it. Handlers run in the same sandbox as any
//! program: they receive `{artifact_id, operation, caller, args}` and
//! return a [`PermissionResult`] as JSON. The kernel ships three built-in
//! handler programs that genesis binds to well-known contract artifacts;
//! user contracts are registered the same way and enjoy no privilege.

use crate::sandbox::{Program, ProgramFuture, Sandbox};
use bedrock::{ExecError, PermissionResult, PrincipalId};
use serde_json::json;
use std::sync::Arc;

/// Parse a handler program's return value into a [`PermissionResult`].
///
/// A bare boolean is accepted as an undecorated allow/deny; anything else
/// must be the full shape. A malformed verdict is a handler failure — and
/// a handler failure is a denial with diagnostics, never an open door.
pub fn parse_verdict(value: serde_json::Value) -> Result<PermissionResult, ExecError> {
    match value {
        serde_json::Value::Bool(true) => Ok(PermissionResult::allow("handler allowed")),
        serde_json::Value::Bool(false) => Ok(PermissionResult::deny("handler denied")),
        other => serde_json::from_value(other)
            .map_err(|e| ExecError::Runtime(format!("malformed permission verdict: {e}"))),
    }
}

/// The argument object handed to handler programs.
#[must_use]
pub fn handler_args(
    artifact_id: &bedrock::ArtifactId,
    operation: &str,
    caller: &PrincipalId,
    args: &serde_json::Value,
) -> serde_json::Value {
    json!({
        "artifact_id": artifact_id,
        "operation": operation,
        "caller": caller,
        "args": args,
    })
}

/// `open_access` — allows everything, optionally at a flat scrip cost
/// (`config: {"cost": n}`).
pub struct OpenAccess;

impl Program for OpenAccess {
    fn name(&self) -> &str {
        "open_access"
    }

    fn call<'a>(&'a self, sandbox: &'a Sandbox) -> ProgramFuture<'a> {
        Box::pin(async move {
            let cost = sandbox.config.get("cost").and_then(|c| c.as_i64()).unwrap_or(0);
            Ok(serde_json::to_value(PermissionResult::allow_at_cost(
                "open access",
                cost,
            ))
            .expect("verdict serializes"))
        })
    }
}

/// `creator_only` — only the target's creator may act; reads may be left
/// open with `config: {"open_reads": true}`.
pub struct CreatorOnly;

impl Program for CreatorOnly {
    fn name(&self) -> &str {
        "creator_only"
    }

    fn call<'a>(&'a self, sandbox: &'a Sandbox) -> ProgramFuture<'a> {
        Box::pin(async move {
            let target = target_id(&sandbox.args)?;
            let operation = sandbox.args["operation"].as_str().unwrap_or_default();
            let info = sandbox.state().get_artifact_info(&target).await?;
            let creator = info["created_by"].as_str().unwrap_or_default();

            let open_reads = sandbox
                .config
                .get("open_reads")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let verdict = if sandbox.caller.as_str() == creator {
                PermissionResult::allow("creator")
            } else if operation == "read" && open_reads {
                PermissionResult::allow("reads are open")
            } else {
                PermissionResult::deny(format!("only {creator} may {operation}"))
            };
            Ok(serde_json::to_value(verdict).expect("verdict serializes"))
        })
    }
}

/// `authorized_writer` — reads are open; writes, deletes and metadata
/// updates require the caller to be the creator or the principal named by
/// the target's `authorized_writer` metadata key.
pub struct AuthorizedWriter;

impl Program for AuthorizedWriter {
    fn name(&self) -> &str {
        "authorized_writer"
    }

    fn call<'a>(&'a self, sandbox: &'a Sandbox) -> ProgramFuture<'a> {
        Box::pin(async move {
            let target = target_id(&sandbox.args)?;
            let operation = sandbox.args["operation"].as_str().unwrap_or_default();
            if matches!(operation, "read" | "query") {
                return Ok(serde_json::to_value(PermissionResult::allow("reads are open"))
                    .expect("verdict serializes"));
            }

            let info = sandbox.state().get_artifact_info(&target).await?;
            let creator = info["created_by"].as_str().unwrap_or_default();
            let metadata = sandbox.state().get_artifact_metadata(&target).await?;
            let authorized = metadata
                .get("authorized_writer")
                .and_then(|v| v.as_str());

            let allowed = sandbox.caller.as_str() == creator
                || authorized == Some(sandbox.caller.as_str());
            let verdict = if allowed {
                PermissionResult::allow("authorized writer")
            } else {
                PermissionResult::deny("caller is not an authorized writer")
            };
            Ok(serde_json::to_value(verdict).expect("verdict serializes"))
        })
    }
}

fn target_id(args: &serde_json::Value) -> Result<bedrock::ArtifactId, bedrock::ExecError> {
    args["artifact_id"]
        .as_str()
        .map(bedrock::ArtifactId::from)
        .ok_or_else(|| bedrock::ExecError::InvalidArguments("handler args missing artifact_id".into()))
}

/// Register the built-in handler programs.
pub fn register_builtin_handlers(registry: &mut crate::sandbox::ProgramRegistry) {
    registry.register(Arc::new(OpenAccess));
    registry.register(Arc::new(CreatorOnly));
    registry.register(Arc::new(AuthorizedWriter));
}
