//! Sandboxed execution of artifact code.
//!
//! Artifact "code" is a [`CodeRef`](bedrock::CodeRef) naming an entry in
//! the [`ProgramRegistry`]. A [`Program`] runs with a [`Sandbox`] context
//! carrying the verified caller, the artifact it runs as, and two injected
//! handles: [`KernelState`] for read-only queries and [`KernelActions`]
//! for re-entrant dispatch. The caller identity is embedded by the kernel
//! when the sandbox is built — artifact code cannot spoof it.

use crate::dispatcher::Kernel;
use bedrock::{
    ActionResult, Amount, ArtifactId, Balances, Capability, EventFilter, ExecError, Intent,
    KernelEvent, PrincipalId, ResourceKind, WorldError, WriteSpec,
};
use agora_gateway::{ChatRequest, LlmResponse};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by programs.
pub type ProgramFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, ExecError>> + Send + 'a>>;

/// Object-safe trait for artifact code.
///
/// Programs are registered once at boot (or by the embedding process) and
/// bound to artifacts through their `code.program` field. A program's
/// return value becomes the invoke result's `data`; errors become
/// `runtime_error` (or their mapped code) on the [`ActionResult`].
pub trait Program: Send + Sync {
    /// The program's registry name.
    fn name(&self) -> &str;

    /// Whether this program performs its own access control.
    ///
    /// When true, the dispatcher skips the target's access-handler call on
    /// `invoke` — the program receives the verified caller and decides for
    /// itself (the `handle_request` style). When false, the target's
    /// `access_contract_id` handler runs first (the `run` style).
    fn self_access_control(&self) -> bool {
        false
    }

    /// Execute with the given sandbox context.
    fn call<'a>(&'a self, sandbox: &'a Sandbox) -> ProgramFuture<'a>;
}

/// Registry of programs available to the kernel.
pub struct ProgramRegistry {
    programs: HashMap<String, Arc<dyn Program>>,
}

impl ProgramRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
        }
    }

    /// Register a program. Overwrites any existing program with the same name.
    pub fn register(&mut self, program: Arc<dyn Program>) {
        self.programs.insert(program.name().to_string(), program);
    }

    /// Look up a program by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Program>> {
        self.programs.get(name)
    }

    /// Number of registered programs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context handed to a running program.
///
/// `caller` is the verified invoker; `self_id` is the artifact whose code
/// is running. Mutating calls through [`KernelActions`] act *as the
/// artifact*; the LLM syscall bills the verified caller (the wire
/// contract's caller-pays rule).
pub struct Sandbox {
    /// The verified invoker. Cannot be forged by artifact code.
    pub caller: PrincipalId,
    /// The artifact whose code is running.
    pub self_id: ArtifactId,
    /// The requested operation (method name, or the intent's operation).
    pub operation: String,
    /// Invocation arguments.
    pub args: serde_json::Value,
    /// The artifact's `code.config`, passed through verbatim.
    pub config: serde_json::Value,
    /// Current invoke depth (the kernel enforces the cap).
    pub depth: u32,
    pub(crate) kernel: Arc<Kernel>,
}

impl Sandbox {
    /// The read-only state handle.
    #[must_use]
    pub fn state(&self) -> KernelState {
        KernelState {
            kernel: Arc::clone(&self.kernel),
            caller: self.caller.clone(),
            depth: self.depth,
        }
    }

    /// The mutating actions handle, acting as the running artifact.
    #[must_use]
    pub fn actions(&self) -> KernelActions {
        KernelActions {
            kernel: Arc::clone(&self.kernel),
            actor: PrincipalId::from(&self.self_id),
            depth: self.depth,
        }
    }

    /// The LLM syscall. Available iff the running artifact carries the
    /// `can_call_llm` capability; the verified caller's dollar budget is
    /// debited.
    pub async fn syscall_llm(&self, request: ChatRequest) -> Result<LlmResponse, ExecError> {
        let artifact = self
            .kernel
            .store()
            .get_live(&self.self_id)
            .await
            .map_err(world_to_exec)?;
        if !artifact.has_capability(&Capability::CanCallLlm) {
            return Err(ExecError::Gateway(bedrock::GatewayError::CapabilityMissing(
                PrincipalId::from(&self.self_id),
            )));
        }
        let genesis_caller = artifact
            .metadata
            .get("genesis")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        self.kernel
            .gateway()
            .call(&self.caller, request, genesis_caller)
            .await
            .map_err(ExecError::Gateway)
    }
}

fn world_to_exec(err: WorldError) -> ExecError {
    ExecError::Runtime(err.to_string())
}

/// Read-only queries over the world, injected into every invocation.
pub struct KernelState {
    kernel: Arc<Kernel>,
    caller: PrincipalId,
    depth: u32,
}

impl KernelState {
    /// Balances of any principal.
    pub async fn get_balances(&self, principal: &PrincipalId) -> Result<Balances, ExecError> {
        self.kernel
            .ledger()
            .balances(principal)
            .await
            .map_err(world_to_exec)
    }

    /// Remaining rate capacity for a principal and resource, now.
    pub async fn get_resource(
        &self,
        principal: &PrincipalId,
        resource: ResourceKind,
    ) -> Result<u64, ExecError> {
        Ok(self
            .kernel
            .rates()
            .capacity(principal, resource, std::time::Instant::now()))
    }

    /// Structural summary of any artifact, tombstones included. Content
    /// stays behind the access check ([`read_artifact`](Self::read_artifact)).
    pub async fn get_artifact_info(&self, id: &ArtifactId) -> Result<serde_json::Value, ExecError> {
        let artifact = self.kernel.store().get(id).await.map_err(world_to_exec)?;
        Ok(serde_json::json!({
            "id": artifact.id,
            "kind": artifact.kind,
            "created_by": artifact.created_by,
            "access_contract_id": artifact.access_contract_id,
            "has_standing": artifact.has_standing,
            "has_loop": artifact.has_loop,
            "deleted": artifact.deleted,
        }))
    }

    /// Metadata of any artifact, tombstones included.
    pub async fn get_artifact_metadata(
        &self,
        id: &ArtifactId,
    ) -> Result<serde_json::Value, ExecError> {
        let artifact = self.kernel.store().get(id).await.map_err(world_to_exec)?;
        Ok(serde_json::to_value(&artifact.metadata)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Read an artifact *as the verified caller* — the target's access
    /// handler applies, exactly as for a dispatched read.
    pub async fn read_artifact(&self, id: &ArtifactId) -> ActionResult {
        let intent = Intent::Read {
            principal_id: self.caller.clone(),
            artifact_id: id.clone(),
        };
        self.kernel.dispatch_at_depth(intent, self.depth + 1).await
    }

    /// All live artifacts created by a principal.
    pub async fn list_artifacts_by_owner(&self, owner: &PrincipalId) -> Vec<ArtifactId> {
        self.kernel
            .store()
            .select(|a| !a.deleted && &a.created_by == owner)
            .await
            .into_iter()
            .map(|a| a.id)
            .collect()
    }

    /// Recent events matching a filter, since a sequence cursor.
    pub async fn recent_events(
        &self,
        since_seq: u64,
        filter: &EventFilter,
        limit: usize,
    ) -> Vec<KernelEvent> {
        self.kernel.events().read_since(since_seq, filter, limit).await
    }
}

/// State-mutating calls, injected into every invocation.
///
/// Every call re-enters the dispatcher as the *running artifact* at
/// `depth + 1`, so nested effects meet the same permission checks, rate
/// meters, and depth cap as any top-level intent.
pub struct KernelActions {
    kernel: Arc<Kernel>,
    actor: PrincipalId,
    depth: u32,
}

impl KernelActions {
    /// The principal these actions run as.
    #[must_use]
    pub fn actor(&self) -> &PrincipalId {
        &self.actor
    }

    async fn dispatch(&self, intent: Intent) -> ActionResult {
        self.kernel.dispatch_at_depth(intent, self.depth + 1).await
    }

    /// Create or update an artifact.
    pub async fn write_artifact(&self, spec: WriteSpec) -> ActionResult {
        self.dispatch(Intent::Write {
            principal_id: self.actor.clone(),
            spec,
        })
        .await
    }

    /// Move scrip from the running artifact to another principal.
    pub async fn transfer_scrip(&self, to: &PrincipalId, amount: i64) -> ActionResult {
        self.dispatch(Intent::Transfer {
            principal_id: self.actor.clone(),
            to: to.clone(),
            amount: Amount::Units(amount),
            resource: ResourceKind::Scrip,
        })
        .await
    }

    /// Move any transferable stock to another principal.
    pub async fn transfer_resource(
        &self,
        to: &PrincipalId,
        resource: ResourceKind,
        amount: Amount,
    ) -> ActionResult {
        self.dispatch(Intent::Transfer {
            principal_id: self.actor.clone(),
            to: to.clone(),
            amount,
            resource,
        })
        .await
    }

    /// Invoke another artifact. Depth accounting is handled by the kernel;
    /// a chain past the cap fails with `invoke_too_deep`.
    pub async fn invoke(
        &self,
        target: &ArtifactId,
        method: Option<String>,
        args: serde_json::Value,
    ) -> ActionResult {
        self.dispatch(Intent::Invoke {
            principal_id: self.actor.clone(),
            artifact_id: target.clone(),
            method,
            args,
        })
        .await
    }

    /// Soft-delete an artifact.
    pub async fn delete(&self, target: &ArtifactId) -> ActionResult {
        self.dispatch(Intent::Delete {
            principal_id: self.actor.clone(),
            artifact_id: target.clone(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoProgram;

    impl Program for EchoProgram {
        fn name(&self) -> &str {
            "echo"
        }
        fn call<'a>(&'a self, sandbox: &'a Sandbox) -> ProgramFuture<'a> {
            Box::pin(async move { Ok(json!({"echoed": sandbox.args})) })
        }
    }

    struct FailProgram;

    impl Program for FailProgram {
        fn name(&self) -> &str {
            "fail"
        }
        fn call<'a>(&'a self, _sandbox: &'a Sandbox) -> ProgramFuture<'a> {
            Box::pin(async { Err(ExecError::Runtime("always fails".into())) })
        }
    }

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn program_is_object_safe() {
        _assert_send_sync::<Arc<dyn Program>>();
    }

    #[test]
    fn registry_add_get_overwrite() {
        let mut registry = ProgramRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(EchoProgram));
        registry.register(Arc::new(FailProgram));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());

        registry.register(Arc::new(EchoProgram));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn programs_default_to_handler_mediated_access() {
        assert!(!EchoProgram.self_access_control());
    }
}
