//! The dispatcher — the narrow waist every state mutation flows through.
//!
//! `dispatch(intent)` validates, consults the permission layer, meters
//! cost against rate windows and budgets, executes the effect (possibly
//! inside the sandbox, possibly recursively), appends exactly one `action`
//! event nesting the intent and its result, and returns an
//! [`ActionResult`]. Errors are data: the dispatch call itself never
//! fails, and nothing thrown inside the sandbox crosses this boundary.

use crate::config::{ContractDefault, ExecutorConfig, InterfaceValidation, PromptConfig};
use crate::permission::{handler_args, parse_verdict};
use crate::sandbox::{ProgramRegistry, Sandbox};
use crate::validate;
use agora_events::EventLog;
use agora_gateway::Gateway;
use agora_world::{ArtifactStore, IdRegistry, Ledger, RateTracker};
use bedrock::{
    ActionResult, Amount, Artifact, ArtifactId, ErrorCode, EventDraft, EventFilter, EventKind,
    ExecError, Intent, PermissionResult, PrincipalId, PromptEdit, QueryFilter, QueryKind,
    ResourceKind, ResourceUsage, WorldError, WriteSpec,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metadata keys `update_metadata` refuses to touch. Handlers may widen by
/// accepting such changes through their own `write` paths; the kernel
/// itself never bypasses them.
const RESERVED_METADATA_KEYS: &[&str] = &["authorized_writer", "authorized_principal"];

/// Default number of rows a query returns when the filter sets no limit.
const DEFAULT_QUERY_LIMIT: usize = 100;

/// The assembled kernel: world containers, gateway, program registry, and
/// the dispatch logic tying them together.
pub struct Kernel {
    store: Arc<ArtifactStore>,
    ledger: Arc<Ledger>,
    registry: Arc<IdRegistry>,
    rates: Arc<RateTracker>,
    events: Arc<EventLog>,
    gateway: Arc<Gateway>,
    programs: Arc<ProgramRegistry>,
    executor: ExecutorConfig,
    prompt: PromptConfig,
}

impl Kernel {
    /// Assemble a kernel from its parts.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<ArtifactStore>,
        ledger: Arc<Ledger>,
        registry: Arc<IdRegistry>,
        rates: Arc<RateTracker>,
        events: Arc<EventLog>,
        gateway: Arc<Gateway>,
        programs: Arc<ProgramRegistry>,
        executor: ExecutorConfig,
        prompt: PromptConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            ledger,
            registry,
            rates,
            events,
            gateway,
            programs,
            executor,
            prompt,
        })
    }

    /// The artifact store.
    #[must_use]
    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// The ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// The ID registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<IdRegistry> {
        &self.registry
    }

    /// The rate tracker.
    #[must_use]
    pub fn rates(&self) -> &Arc<RateTracker> {
        &self.rates
    }

    /// The event log.
    #[must_use]
    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// The LLM gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// The executor configuration.
    #[must_use]
    pub fn executor_config(&self) -> &ExecutorConfig {
        &self.executor
    }

    /// The system-prompt configuration.
    #[must_use]
    pub fn prompt_config(&self) -> &PromptConfig {
        &self.prompt
    }

    /// Grant a kernel capability to an artifact.
    ///
    /// Capabilities are kernel-granted, never self-declared: there is no
    /// intent that sets them, so an agent cannot write itself
    /// `can_call_llm`. The boot loader and the embedding process are the
    /// only callers.
    pub async fn grant_capability(
        &self,
        artifact_id: &ArtifactId,
        capability: bedrock::Capability,
    ) -> Result<(), WorldError> {
        self.store
            .update(artifact_id, |a| {
                a.capabilities.insert(capability);
            })
            .await
    }

    /// Dispatch a top-level intent.
    pub async fn dispatch(self: &Arc<Self>, intent: Intent) -> ActionResult {
        self.dispatch_at_depth(intent, 0).await
    }

    /// Dispatch at an explicit invoke depth. Sandbox handles re-enter here
    /// with `depth + 1`; the depth cap turns runaway recursion into
    /// `invoke_too_deep` instead of a blown stack.
    pub(crate) fn dispatch_at_depth<'a>(
        self: &'a Arc<Self>,
        intent: Intent,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = ActionResult> + Send + 'a>> {
        Box::pin(async move {
            let result = self.run_intent(&intent, depth).await;

            let draft = EventDraft::action(&intent, &result);
            if let Err(err) = self.events.append(draft).await {
                tracing::warn!(%err, "failed to append action event");
            }
            result
        })
    }

    async fn run_intent(self: &Arc<Self>, intent: &Intent, depth: u32) -> ActionResult {
        if let Err(violation) = validate::check_intent(intent) {
            return ActionResult::fail(ErrorCode::InvalidArgument, violation);
        }
        let caller = intent.principal();
        if !self.ledger.contains(caller).await {
            return ActionResult::fail(
                ErrorCode::NotFound,
                format!("unknown principal: {caller}"),
            );
        }

        match intent {
            Intent::Read { artifact_id, .. } => self.effect_read(caller, artifact_id, depth).await,
            Intent::Write { spec, .. } => self.effect_write(caller, spec, depth).await,
            Intent::Invoke {
                artifact_id,
                method,
                args,
                ..
            } => {
                self.effect_invoke(caller, artifact_id, method.as_deref(), args, depth)
                    .await
            }
            Intent::Transfer {
                to,
                amount,
                resource,
                ..
            } => self.effect_transfer(caller, to, *amount, *resource).await,
            Intent::Delete { artifact_id, .. } => {
                self.effect_delete(caller, artifact_id, depth).await
            }
            Intent::Query {
                query_type, filter, ..
            } => self.effect_query(caller, query_type, filter).await,
            Intent::Noop { reason, .. } => {
                ActionResult::ok_with("noop", json!({"reason": reason}))
            }
            Intent::UpdateMetadata {
                artifact_id,
                updates,
                ..
            } => {
                self.effect_update_metadata(caller, artifact_id, updates, depth)
                    .await
            }
            Intent::ModifySystemPrompt { edit, .. } => {
                self.effect_modify_prompt(caller, edit).await
            }
            _ => ActionResult::fail(ErrorCode::InvalidArgument, "unsupported intent".to_string()),
        }
    }

    // ── permission layer ────────────────────────────────────────────────

    /// Ask the target's access handler for a verdict and settle its cost.
    /// Returns the verdict, or a ready-made failure result.
    async fn permission_gate(
        self: &Arc<Self>,
        caller: &PrincipalId,
        operation: &str,
        target: &Artifact,
        args: &serde_json::Value,
        depth: u32,
    ) -> Result<(PermissionResult, ResourceUsage, PrincipalId), ActionResult> {
        let verdict = match &target.access_contract_id {
            Some(handler_id) => match self
                .run_access_handler(caller, operation, target, handler_id, args, depth)
                .await
            {
                Ok(verdict) => verdict,
                Err(failure) => return Err(failure),
            },
            None => match self.executor.default_on_missing {
                ContractDefault::Allow => PermissionResult::allow("no handler; default allows"),
                ContractDefault::Deny => PermissionResult::deny("no handler; default denies"),
            },
        };

        if !verdict.allowed {
            return Err(ActionResult::fail(
                ErrorCode::NotAuthorized,
                verdict.reason.clone(),
            ));
        }

        let payer = verdict.payer.clone().unwrap_or_else(|| caller.clone());
        let mut usage = ResourceUsage::default();
        if verdict.cost > 0 {
            if let Err(err) = self.ledger.debit_scrip(&payer, verdict.cost).await {
                return Err(world_failure(err));
            }
            usage.scrip = verdict.cost;
        }
        Ok((verdict, usage, payer))
    }

    /// Run the handler artifact's program in the sandbox. Handler failures
    /// deny — a broken lock is a locked door.
    async fn run_access_handler(
        self: &Arc<Self>,
        caller: &PrincipalId,
        operation: &str,
        target: &Artifact,
        handler_id: &ArtifactId,
        args: &serde_json::Value,
        depth: u32,
    ) -> Result<PermissionResult, ActionResult> {
        if depth > self.executor.max_invoke_depth {
            return Err(ActionResult::fail(
                ErrorCode::InvokeTooDeep,
                format!(
                    "access handler for {} would exceed depth cap {}",
                    target.id, self.executor.max_invoke_depth
                ),
            ));
        }
        let handler = match self.store.get_live(handler_id).await {
            Ok(handler) => handler,
            Err(err) => {
                tracing::warn!(target = %target.id, handler = %handler_id, %err,
                    "access handler unavailable, denying");
                return Ok(PermissionResult::deny(format!(
                    "access handler {handler_id} unavailable"
                )));
            }
        };
        let Some(code) = handler.code.clone() else {
            return Ok(PermissionResult::deny(format!(
                "access handler {handler_id} carries no code"
            )));
        };
        let Some(program) = self.programs.get(&code.program).cloned() else {
            return Ok(PermissionResult::deny(format!(
                "access handler program {} not registered",
                code.program
            )));
        };

        let sandbox = Sandbox {
            caller: caller.clone(),
            self_id: handler.id.clone(),
            operation: operation.to_string(),
            args: handler_args(&target.id, operation, caller, args),
            config: code.config,
            depth: depth + 1,
            kernel: Arc::clone(self),
        };
        let timeout = Duration::from_secs(self.executor.invoke_timeout_secs);
        let outcome = tokio::time::timeout(timeout, program.call(&sandbox)).await;
        match outcome {
            Ok(Ok(value)) => match parse_verdict(value) {
                Ok(verdict) => Ok(verdict),
                Err(err) => Ok(PermissionResult::deny(err.to_string())),
            },
            Ok(Err(err)) => Ok(PermissionResult::deny(format!("handler failed: {err}"))),
            Err(_) => Ok(PermissionResult::deny("handler timed out")),
        }
    }

    // ── effects ─────────────────────────────────────────────────────────

    async fn effect_read(
        self: &Arc<Self>,
        caller: &PrincipalId,
        artifact_id: &ArtifactId,
        depth: u32,
    ) -> ActionResult {
        let artifact = match self.store.get(artifact_id).await {
            Ok(artifact) => artifact,
            Err(err) => return world_failure(err),
        };

        // Tombstones are readable as metadata without consulting a handler
        // that may itself be gone.
        if artifact.deleted {
            return ActionResult::ok_with(
                format!("{artifact_id} is deleted"),
                json!({
                    "id": artifact.id,
                    "kind": artifact.kind,
                    "metadata": artifact.metadata,
                    "created_by": artifact.created_by,
                    "deleted": true,
                    "deleted_at": artifact.deleted_at,
                    "deleted_by": artifact.deleted_by,
                }),
            );
        }

        let (_, usage, payer) = match self
            .permission_gate(caller, "read", &artifact, &serde_json::Value::Null, depth)
            .await
        {
            Ok(gate) => gate,
            Err(failure) => return failure,
        };

        ActionResult::ok_with(
            format!("read {artifact_id}"),
            json!({
                "id": artifact.id,
                "kind": artifact.kind,
                "content": artifact.content,
                "interface": artifact.interface,
                "metadata": artifact.metadata,
                "created_by": artifact.created_by,
                "deleted": false,
            }),
        )
        .charged(usage, payer)
    }

    async fn effect_write(
        self: &Arc<Self>,
        caller: &PrincipalId,
        spec: &WriteSpec,
        depth: u32,
    ) -> ActionResult {
        if self.store.contains(&spec.artifact_id).await {
            self.update_existing(caller, spec, depth).await
        } else {
            self.create_artifact(caller, spec).await
        }
    }

    async fn update_existing(
        self: &Arc<Self>,
        caller: &PrincipalId,
        spec: &WriteSpec,
        depth: u32,
    ) -> ActionResult {
        let artifact = match self.store.get(&spec.artifact_id).await {
            Ok(artifact) => artifact,
            Err(err) => return world_failure(err),
        };
        if artifact.deleted {
            return ActionResult::fail(
                ErrorCode::Deleted,
                format!("{} is deleted", spec.artifact_id),
            );
        }
        if artifact.kind != spec.kind {
            return ActionResult::fail(
                ErrorCode::InvalidType,
                format!(
                    "cannot change kind of {} from {:?} to {:?}",
                    spec.artifact_id, artifact.kind, spec.kind
                ),
            );
        }

        let args = json!({"content_len": spec.content.len()});
        let (_, usage, payer) = match self
            .permission_gate(caller, "write", &artifact, &args, depth)
            .await
        {
            Ok(gate) => gate,
            Err(failure) => return failure,
        };

        // Standing can be gained on update, never dropped.
        let gain_standing = spec.has_standing && !artifact.has_standing;
        let update = self
            .store
            .update(&spec.artifact_id, |a| {
                a.content = spec.content.clone();
                if let Some(interface) = &spec.interface {
                    a.interface = interface.clone();
                }
                if let Some(code) = &spec.code {
                    a.code = Some(code.clone());
                }
                for (key, value) in &spec.metadata {
                    if value.is_null() {
                        a.metadata.remove(key);
                    } else {
                        a.metadata.insert(key.clone(), value.clone());
                    }
                }
                if gain_standing {
                    a.has_standing = true;
                }
                if spec.has_loop {
                    a.has_loop = true;
                }
            })
            .await;
        if let Err(err) = update {
            return world_failure(err);
        }
        if gain_standing {
            self.ledger
                .ensure_account(&PrincipalId::from(&spec.artifact_id))
                .await;
            if let Err(err) = self.registry.grant_standing(spec.artifact_id.as_str()).await {
                return world_failure(err);
            }
        }

        ActionResult::ok_with(
            format!("updated {}", spec.artifact_id),
            json!({"artifact_id": spec.artifact_id, "created": false}),
        )
        .charged(usage, payer)
    }

    async fn create_artifact(self: &Arc<Self>, caller: &PrincipalId, spec: &WriteSpec) -> ActionResult {
        let Some(interface) = spec.interface.clone() else {
            return ActionResult::fail(
                ErrorCode::InvalidArgument,
                "interface is required when creating an artifact",
            );
        };

        // A boot-seeded principal may write its own artifact body later;
        // nobody else may claim standing over an existing account.
        if spec.has_standing {
            let principal = PrincipalId::from(&spec.artifact_id);
            if self.ledger.contains(&principal).await && caller != &principal {
                return ActionResult::fail(
                    ErrorCode::NotAuthorized,
                    format!("{principal} is already a principal"),
                );
            }
        }

        let artifact = Artifact {
            id: spec.artifact_id.clone(),
            kind: spec.kind,
            content: spec.content.clone(),
            code: spec.code.clone(),
            interface,
            created_by: caller.clone(),
            access_contract_id: spec.access_contract_id.clone(),
            capabilities: Default::default(),
            has_standing: spec.has_standing,
            has_loop: spec.has_loop,
            metadata: spec.metadata.clone(),
            deleted: false,
            deleted_at: None,
            deleted_by: None,
        };
        if let Some(violation) = artifact.validate() {
            return ActionResult::fail(ErrorCode::InvalidArgument, violation);
        }

        // Disk is charged up front and refunded if registration loses a
        // race; the registry claim is released if the insert fails.
        let disk = artifact.disk_size();
        if let Err(err) = self.ledger.charge_disk(caller, disk).await {
            return world_failure(err);
        }
        if let Err(err) = self
            .registry
            .register(spec.artifact_id.as_str(), spec.kind, spec.has_standing)
            .await
        {
            let _ = self.ledger.credit_disk(caller, disk).await;
            return world_failure(err);
        }
        if let Err(err) = self.store.insert(artifact).await {
            self.registry.release(spec.artifact_id.as_str()).await;
            let _ = self.ledger.credit_disk(caller, disk).await;
            return world_failure(err);
        }
        if spec.has_standing {
            self.ledger
                .ensure_account(&PrincipalId::from(&spec.artifact_id))
                .await;
        }

        let draft = EventDraft::new(
            EventKind::ArtifactCreated,
            caller.clone(),
            json!({
                "artifact_id": spec.artifact_id,
                "kind": spec.kind,
                "has_standing": spec.has_standing,
                "has_loop": spec.has_loop,
            }),
        );
        if let Err(err) = self.events.append(draft).await {
            tracing::warn!(%err, "failed to append artifact_created event");
        }

        let usage = ResourceUsage {
            disk_bytes: disk,
            ..Default::default()
        };
        ActionResult::ok_with(
            format!("created {}", spec.artifact_id),
            json!({"artifact_id": spec.artifact_id, "created": true, "disk_charged": disk}),
        )
        .charged(usage, caller.clone())
    }

    async fn effect_invoke(
        self: &Arc<Self>,
        caller: &PrincipalId,
        artifact_id: &ArtifactId,
        method: Option<&str>,
        args: &serde_json::Value,
        depth: u32,
    ) -> ActionResult {
        if depth > self.executor.max_invoke_depth {
            return ActionResult::fail(
                ErrorCode::InvokeTooDeep,
                format!(
                    "invoke depth {depth} exceeds cap {}",
                    self.executor.max_invoke_depth
                ),
            );
        }

        let artifact = match self.store.get(artifact_id).await {
            Ok(artifact) => artifact,
            Err(err) => return world_failure(err),
        };
        if artifact.deleted {
            return ActionResult::fail(
                ErrorCode::Deleted,
                format!("{artifact_id} is deleted"),
            );
        }
        let Some(code) = artifact.code.clone() else {
            return ActionResult::fail(
                ErrorCode::InvalidArgument,
                format!("{artifact_id} carries no code"),
            );
        };
        let Some(program) = self.programs.get(&code.program).cloned() else {
            return self
                .invoke_failed(
                    caller,
                    artifact_id,
                    ExecError::ProgramNotFound(code.program.clone()),
                    ResourceUsage::default(),
                    None,
                )
                .await;
        };

        if let Err(err) =
            self.rates
                .consume_or_err(caller, ResourceKind::CpuRate, 1, Instant::now())
        {
            return world_failure(err);
        }

        // Argument validation against the declared method schema.
        if let Some(violation) = self.validate_invoke_args(&artifact, method, args) {
            return ActionResult::fail(ErrorCode::InvalidArgument, violation);
        }

        // `handle_request`-style programs adjudicate access themselves.
        let (usage, payer) = if program.self_access_control() {
            (ResourceUsage::default(), caller.clone())
        } else {
            match self
                .permission_gate(caller, "invoke", &artifact, args, depth)
                .await
            {
                Ok((_, usage, payer)) => (usage, payer),
                Err(failure) => return failure,
            }
        };

        let operation = method.unwrap_or("run").to_string();
        let sandbox = Sandbox {
            caller: caller.clone(),
            self_id: artifact.id.clone(),
            operation: operation.clone(),
            args: args.clone(),
            config: code.config,
            depth,
            kernel: Arc::clone(self),
        };
        let timeout = Duration::from_secs(self.executor.invoke_timeout_secs);
        let outcome = tokio::time::timeout(timeout, program.call(&sandbox)).await;

        match outcome {
            Ok(Ok(value)) => {
                let draft = EventDraft::new(
                    EventKind::InvokeSuccess,
                    caller.clone(),
                    json!({"artifact_id": artifact_id, "method": operation}),
                );
                if let Err(err) = self.events.append(draft).await {
                    tracing::warn!(%err, "failed to append invoke_success event");
                }
                ActionResult::ok_with(
                    format!("invoked {artifact_id}"),
                    json!({"result": value}),
                )
                .charged(usage, payer)
            }
            Ok(Err(err)) => {
                self.invoke_failed(caller, artifact_id, err, usage, Some(payer))
                    .await
            }
            Err(_) => {
                self.invoke_failed(
                    caller,
                    artifact_id,
                    ExecError::Timeout(timeout),
                    usage,
                    Some(payer),
                )
                .await
            }
        }
    }

    /// Record an `invoke_failure` event and build the failure result.
    async fn invoke_failed(
        self: &Arc<Self>,
        caller: &PrincipalId,
        artifact_id: &ArtifactId,
        err: ExecError,
        usage: ResourceUsage,
        payer: Option<PrincipalId>,
    ) -> ActionResult {
        let code = err.code();
        let draft = EventDraft::new(
            EventKind::InvokeFailure,
            caller.clone(),
            json!({
                "artifact_id": artifact_id,
                "error_code": code,
                "message": err.to_string(),
            }),
        );
        if let Err(append_err) = self.events.append(draft).await {
            tracing::warn!(%append_err, "failed to append invoke_failure event");
        }
        let mut result = ActionResult::fail(code, err.to_string());
        if let Some(payer) = payer {
            result = result.charged(usage, payer);
        }
        result
    }

    fn validate_invoke_args(
        &self,
        artifact: &Artifact,
        method: Option<&str>,
        args: &serde_json::Value,
    ) -> Option<String> {
        if self.executor.interface_validation == InterfaceValidation::None {
            return None;
        }
        let Some(name) = method else {
            return None;
        };
        let Some(spec) = artifact.interface.method(name) else {
            let violation = format!("{} declares no method '{name}'", artifact.id);
            return match self.executor.interface_validation {
                InterfaceValidation::Strict => Some(violation),
                _ => {
                    tracing::warn!(artifact = %artifact.id, method = name, "undeclared method");
                    None
                }
            };
        };
        match validate::check_against_schema(args, &spec.input_schema) {
            Ok(()) => None,
            Err(violation) => match self.executor.interface_validation {
                InterfaceValidation::Strict => Some(violation),
                _ => {
                    tracing::warn!(artifact = %artifact.id, method = name, %violation,
                        "invoke args fail schema");
                    None
                }
            },
        }
    }

    async fn effect_transfer(
        self: &Arc<Self>,
        caller: &PrincipalId,
        to: &PrincipalId,
        amount: Amount,
        resource: ResourceKind,
    ) -> ActionResult {
        match self.ledger.transfer(caller, to, resource, amount).await {
            Ok((from_balances, to_balances)) => {
                let new_balances = match resource {
                    ResourceKind::Scrip => json!([from_balances.scrip, to_balances.scrip]),
                    ResourceKind::LlmBudget => json!([
                        from_balances.llm_dollar_budget.to_string(),
                        to_balances.llm_dollar_budget.to_string(),
                    ]),
                    _ => json!([from_balances.disk_quota, to_balances.disk_quota]),
                };
                ActionResult::ok_with(
                    format!("transferred {} {resource} to {to}", amount.as_decimal()),
                    json!({"new_balances": new_balances, "resource": resource}),
                )
            }
            Err(err) => world_failure(err),
        }
    }

    async fn effect_delete(
        self: &Arc<Self>,
        caller: &PrincipalId,
        artifact_id: &ArtifactId,
        depth: u32,
    ) -> ActionResult {
        let artifact = match self.store.get(artifact_id).await {
            Ok(artifact) => artifact,
            Err(err) => return world_failure(err),
        };
        if artifact.deleted {
            return ActionResult::fail(
                ErrorCode::Deleted,
                format!("{artifact_id} is already deleted"),
            );
        }
        let (_, usage, payer) = match self
            .permission_gate(caller, "delete", &artifact, &serde_json::Value::Null, depth)
            .await
        {
            Ok(gate) => gate,
            Err(failure) => return failure,
        };
        if let Err(err) = self.store.mark_deleted(artifact_id, caller).await {
            return world_failure(err);
        }
        ActionResult::ok_with(
            format!("deleted {artifact_id}"),
            json!({"artifact_id": artifact_id, "deleted": true}),
        )
        .charged(usage, payer)
    }

    async fn effect_query(
        self: &Arc<Self>,
        caller: &PrincipalId,
        query_type: &QueryKind,
        filter: &QueryFilter,
    ) -> ActionResult {
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        match query_type {
            QueryKind::Artifacts => {
                let rows: Vec<serde_json::Value> = self
                    .store
                    .select(|a| artifact_matches(a, filter))
                    .await
                    .into_iter()
                    .take(limit)
                    .map(|a| {
                        json!({
                            "id": a.id,
                            "kind": a.kind,
                            "description": a.interface.description,
                            "created_by": a.created_by,
                            "has_standing": a.has_standing,
                            "deleted": a.deleted,
                        })
                    })
                    .collect();
                ActionResult::ok_with(
                    format!("{} artifacts", rows.len()),
                    json!({"artifacts": rows}),
                )
            }
            QueryKind::Principals => {
                let principals = self.ledger.principals().await;
                ActionResult::ok_with(
                    format!("{} principals", principals.len()),
                    json!({"principals": principals}),
                )
            }
            QueryKind::Balances => {
                let subject = filter.principal_id.clone().unwrap_or_else(|| caller.clone());
                match self.ledger.balances(&subject).await {
                    Ok(balances) => ActionResult::ok_with(
                        format!("balances of {subject}"),
                        json!({
                            "principal_id": subject,
                            "scrip": balances.scrip,
                            "llm_dollar_budget": balances.llm_dollar_budget.to_string(),
                            "disk_quota": balances.disk_quota,
                        }),
                    ),
                    Err(err) => world_failure(err),
                }
            }
            QueryKind::Events => {
                let since = filter.since_seq.unwrap_or(1);
                let event_filter = EventFilter {
                    principal_id: filter.principal_id.clone(),
                    ..Default::default()
                };
                let events = self.events.read_since(since, &event_filter, limit).await;
                ActionResult::ok_with(
                    format!("{} events", events.len()),
                    json!({"events": events}),
                )
            }
            _ => ActionResult::fail(ErrorCode::InvalidArgument, "unsupported query type".to_string()),
        }
    }

    async fn effect_update_metadata(
        self: &Arc<Self>,
        caller: &PrincipalId,
        artifact_id: &ArtifactId,
        updates: &BTreeMap<String, serde_json::Value>,
        depth: u32,
    ) -> ActionResult {
        for key in updates.keys() {
            if RESERVED_METADATA_KEYS.contains(&key.as_str()) {
                return ActionResult::fail(
                    ErrorCode::InvalidArgument,
                    format!("metadata key '{key}' is reserved"),
                );
            }
        }
        let artifact = match self.store.get(artifact_id).await {
            Ok(artifact) => artifact,
            Err(err) => return world_failure(err),
        };
        if artifact.deleted {
            return ActionResult::fail(
                ErrorCode::Deleted,
                format!("{artifact_id} is deleted"),
            );
        }
        let args = json!({"keys": updates.keys().collect::<Vec<_>>()});
        let (_, usage, payer) = match self
            .permission_gate(caller, "update_metadata", &artifact, &args, depth)
            .await
        {
            Ok(gate) => gate,
            Err(failure) => return failure,
        };
        let outcome = self
            .store
            .update(artifact_id, |a| {
                for (key, value) in updates {
                    if value.is_null() {
                        a.metadata.remove(key);
                    } else {
                        a.metadata.insert(key.clone(), value.clone());
                    }
                }
            })
            .await;
        if let Err(err) = outcome {
            return world_failure(err);
        }
        ActionResult::ok_with(
            format!("updated metadata of {artifact_id}"),
            json!({"updated": updates.keys().collect::<Vec<_>>()}),
        )
        .charged(usage, payer)
    }

    async fn effect_modify_prompt(
        self: &Arc<Self>,
        caller: &PrincipalId,
        edit: &PromptEdit,
    ) -> ActionResult {
        let caller_artifact = match self.store.get_live(&ArtifactId::from(caller)).await {
            Ok(artifact) => artifact,
            Err(err) => return world_failure(err),
        };
        let Some(prompt_id) = caller_artifact.metadata_str("system_prompt_id").map(ArtifactId::from)
        else {
            return ActionResult::fail(
                ErrorCode::InvalidArgument,
                format!("{caller} has no system_prompt_id metadata"),
            );
        };
        let prompt = match self.store.get_live(&prompt_id).await {
            Ok(prompt) => prompt,
            Err(err) => return world_failure(err),
        };

        let protected = prefix_of(&prompt.content, self.prompt.protected_prefix_chars);
        let initial = prompt
            .metadata_str("initial_prompt")
            .map(str::to_owned)
            .unwrap_or_else(|| prompt.content.clone());

        let new_content = match apply_prompt_edit(&prompt.content, edit, &protected, &initial) {
            Ok(content) => content,
            Err(violation) => return ActionResult::fail(ErrorCode::InvalidArgument, violation),
        };
        if new_content.len() > self.prompt.max_size_bytes {
            return ActionResult::fail(
                ErrorCode::InvalidArgument,
                format!(
                    "prompt would be {} bytes, cap is {}",
                    new_content.len(),
                    self.prompt.max_size_bytes
                ),
            );
        }
        if !new_content.starts_with(&protected) {
            return ActionResult::fail(
                ErrorCode::InvalidArgument,
                "edit would alter the protected prefix",
            );
        }

        let initial_to_stamp = initial.clone();
        let outcome = self
            .store
            .update(&prompt_id, |a| {
                // First edit preserves the original for `reset`.
                a.metadata
                    .entry("initial_prompt".to_string())
                    .or_insert_with(|| json!(initial_to_stamp));
                a.content = new_content.clone();
            })
            .await;
        if let Err(err) = outcome {
            return world_failure(err);
        }
        ActionResult::ok_with(
            format!("modified system prompt of {caller}"),
            json!({"prompt_id": prompt_id, "size": new_content.len()}),
        )
    }
}

/// Builder wiring a kernel from a provider and configuration.
///
/// Containers are created fresh; built-in access-handler programs are
/// always registered. Only the provider is required.
///
/// # Example
///
/// ```ignore
/// let kernel = Kernel::builder(Arc::new(MockProvider::text("ok", dec!(0.0001))))
///     .executor(ExecutorConfig::default())
///     .rate_limit(ResourceKind::LlmCallRate, RateLimit::per_seconds(2, 60))
///     .build();
/// ```
pub struct KernelBuilder {
    provider: Arc<dyn agora_gateway::LlmProvider>,
    executor: ExecutorConfig,
    prompt: PromptConfig,
    gateway_config: agora_gateway::GatewayConfig,
    rate_limits: std::collections::HashMap<ResourceKind, agora_world::RateLimit>,
    sink: Option<agora_events::JsonlSink>,
    debug_ticks: bool,
    programs: ProgramRegistry,
}

impl Kernel {
    /// Start building a kernel around an LLM provider.
    #[must_use]
    pub fn builder(provider: Arc<dyn agora_gateway::LlmProvider>) -> KernelBuilder {
        let mut programs = ProgramRegistry::new();
        crate::permission::register_builtin_handlers(&mut programs);
        KernelBuilder {
            provider,
            executor: ExecutorConfig::default(),
            prompt: PromptConfig::default(),
            gateway_config: agora_gateway::GatewayConfig::default(),
            rate_limits: std::collections::HashMap::new(),
            sink: None,
            debug_ticks: false,
            programs,
        }
    }
}

impl KernelBuilder {
    /// Set the executor section.
    #[must_use]
    pub fn executor(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    /// Set the system-prompt section.
    #[must_use]
    pub fn prompt(mut self, config: PromptConfig) -> Self {
        self.prompt = config;
        self
    }

    /// Set the gateway section.
    #[must_use]
    pub fn gateway(mut self, config: agora_gateway::GatewayConfig) -> Self {
        self.gateway_config = config;
        self
    }

    /// Add a rate limit for one resource.
    #[must_use]
    pub fn rate_limit(mut self, resource: ResourceKind, limit: agora_world::RateLimit) -> Self {
        self.rate_limits.insert(resource, limit);
        self
    }

    /// Mirror events to a JSONL sink.
    #[must_use]
    pub fn sink(mut self, sink: agora_events::JsonlSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Stamp events with the debug tick counter.
    #[must_use]
    pub fn debug_ticks(mut self, enabled: bool) -> Self {
        self.debug_ticks = enabled;
        self
    }

    /// Register a program artifacts can bind as code.
    #[must_use]
    pub fn program(mut self, program: Arc<dyn crate::sandbox::Program>) -> Self {
        self.programs.register(program);
        self
    }

    /// Assemble the kernel.
    #[must_use]
    pub fn build(self) -> Arc<Kernel> {
        let store = Arc::new(ArtifactStore::new());
        let ledger = Arc::new(Ledger::new());
        let registry = Arc::new(IdRegistry::new());
        let rates = Arc::new(RateTracker::new(self.rate_limits));
        let mut events = match self.sink {
            Some(sink) => EventLog::with_sink(sink),
            None => EventLog::in_memory(),
        };
        if self.debug_ticks {
            events = events.with_debug_ticks();
        }
        let events = Arc::new(events);
        let gateway = Arc::new(Gateway::new(
            self.provider,
            Arc::clone(&ledger),
            Arc::clone(&rates),
            Arc::clone(&events),
            self.gateway_config,
        ));
        Kernel::new(
            store,
            ledger,
            registry,
            rates,
            events,
            gateway,
            Arc::new(self.programs),
            self.executor,
            self.prompt,
        )
    }
}

/// Match an artifact against a query filter.
fn artifact_matches(artifact: &Artifact, filter: &QueryFilter) -> bool {
    if artifact.deleted && !filter.include_deleted {
        return false;
    }
    if let Some(kind) = filter.kind
        && artifact.kind != kind
    {
        return false;
    }
    if let Some(creator) = &filter.created_by
        && &artifact.created_by != creator
    {
        return false;
    }
    if !filter.tags.is_empty() {
        let tags: Vec<&str> = artifact
            .metadata
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if !filter.tags.iter().all(|t| tags.contains(&t.as_str())) {
            return false;
        }
    }
    true
}

/// The first `chars` characters of `content`.
fn prefix_of(content: &str, chars: usize) -> String {
    content.chars().take(chars).collect()
}

/// Apply a structured prompt edit, honoring the protected prefix.
fn apply_prompt_edit(
    current: &str,
    edit: &PromptEdit,
    protected: &str,
    initial: &str,
) -> Result<String, String> {
    match edit {
        PromptEdit::Append { text } => Ok(format!("{current}{text}")),
        PromptEdit::Prepend { text } => {
            let body = &current[protected.len()..];
            Ok(format!("{protected}{text}{body}"))
        }
        PromptEdit::ReplaceSection { section, text } => {
            let heading = format!("## {section}");
            let Some(start) = current.find(&heading) else {
                return Err(format!("no section '{section}' in prompt"));
            };
            let body_start = start + heading.len();
            let rest = &current[body_start..];
            let end = rest.find("\n## ").map(|o| body_start + o).unwrap_or(current.len());
            Ok(format!(
                "{}{heading}\n{text}{}",
                &current[..start],
                &current[end..]
            ))
        }
        PromptEdit::Reset => Ok(initial.to_string()),
        _ => Err("unsupported prompt edit".to_string()),
    }
}

/// Fold a world error into a failure result.
fn world_failure(err: WorldError) -> ActionResult {
    let code = err.code();
    match err {
        WorldError::RateExceeded {
            retry_after_secs, ..
        } => ActionResult::fail_with(
            code,
            err.to_string(),
            json!({"retry_after": retry_after_secs}),
        ),
        other => ActionResult::fail(code, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_edits_compose() {
        let current = "CORE\n## Goals\nold goals\n## Style\nterse";
        let protected = "CORE";
        let edited = apply_prompt_edit(
            current,
            &PromptEdit::ReplaceSection {
                section: "Goals".into(),
                text: "new goals\n".into(),
            },
            protected,
            current,
        )
        .unwrap();
        assert!(edited.contains("## Goals\nnew goals"));
        assert!(edited.contains("## Style\nterse"));

        let prepended = apply_prompt_edit(
            current,
            &PromptEdit::Prepend {
                text: " (amended)".into(),
            },
            protected,
            current,
        )
        .unwrap();
        assert!(prepended.starts_with("CORE (amended)"));
    }

    #[test]
    fn unknown_section_is_a_violation() {
        let err = apply_prompt_edit(
            "text",
            &PromptEdit::ReplaceSection {
                section: "Missing".into(),
                text: "x".into(),
            },
            "",
            "text",
        )
        .unwrap_err();
        assert!(err.contains("Missing"));
    }

    #[test]
    fn filter_matching_honors_tags_and_tombstones() {
        let mut artifact = Artifact::data("x", "alice", "", "a note");
        artifact
            .metadata
            .insert("tags".into(), json!(["market", "offer"]));

        let mut filter = QueryFilter {
            tags: vec!["market".into()],
            ..Default::default()
        };
        assert!(artifact_matches(&artifact, &filter));
        filter.tags = vec!["market".into(), "missing".into()];
        assert!(!artifact_matches(&artifact, &filter));

        artifact.deleted = true;
        let filter = QueryFilter::default();
        assert!(!artifact_matches(&artifact, &filter));
        let filter = QueryFilter {
            include_deleted: true,
            ..Default::default()
        };
        assert!(artifact_matches(&artifact, &filter));
    }
}
