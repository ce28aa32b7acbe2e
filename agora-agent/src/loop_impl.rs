//! One agent's autonomous loop — the OODA cycle under resource pressure.

use crate::state::AgentState;
use crate::workflow::{IterationOutcome, Thinker, WorkflowError, WorkflowRunner};
use agora_gateway::{ChatMessage, ChatRequest, ToolSpec};
use agora_kernel::Kernel;
use async_trait::async_trait;
use bedrock::{
    ActionResult, Artifact, ArtifactId, ArtifactKind, Capability, ErrorCode, EventDraft,
    EventFilter, EventKind, Intent, Interface, PrincipalId, WriteSpec,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Pause between iterations, in milliseconds.
    #[serde(default = "default_iteration_delay_ms")]
    pub iteration_delay_ms: u64,
    /// Cap on tool-calls executed per iteration.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    /// Bound on the persisted turn history.
    #[serde(default = "default_max_turn_history")]
    pub max_turn_history: usize,
    /// How many recent events the observe phase reads.
    #[serde(default = "default_observe_events")]
    pub observe_events: usize,
}

fn default_iteration_delay_ms() -> u64 {
    500
}
fn default_max_tool_calls() -> usize {
    3
}
fn default_max_turn_history() -> usize {
    50
}
fn default_observe_events() -> usize {
    10
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            iteration_delay_ms: default_iteration_delay_ms(),
            max_tool_calls: default_max_tool_calls(),
            max_turn_history: default_max_turn_history(),
            observe_events: default_observe_events(),
        }
    }
}

/// Why an iteration ended, for pacing decisions.
enum Pace {
    /// Proceed after the normal delay.
    Normal,
    /// Rate-limited; wait this long before the next iteration.
    Backoff(Duration),
    /// Budget-starved on an LLM-dependent path; hibernate.
    Starved,
    /// The agent artifact is gone; stop the loop.
    Stop,
}

/// A [`Thinker`] that answers workflow LLM steps through the gateway,
/// billing the agent itself.
struct GatewayThinker {
    kernel: Arc<Kernel>,
    agent: PrincipalId,
    genesis: bool,
}

#[async_trait]
impl Thinker for GatewayThinker {
    async fn think(&self, prompt: &str, model: Option<&str>) -> Result<String, WorkflowError> {
        let request = ChatRequest {
            model: model.unwrap_or_default().to_string(),
            messages: vec![ChatMessage::user(prompt)],
            tools: None,
        };
        let response = self
            .kernel
            .gateway()
            .call(&self.agent, request, self.genesis)
            .await
            .map_err(|e| WorkflowError::Think(e.to_string()))?;
        Ok(response.content)
    }
}

/// One agent's loop: observe, think, decide, act, pace.
pub struct AgentLoop {
    kernel: Arc<Kernel>,
    agent: PrincipalId,
    config: LoopConfig,
    cancel: CancellationToken,
}

impl AgentLoop {
    /// Build a loop for one agent.
    #[must_use]
    pub fn new(
        kernel: Arc<Kernel>,
        agent: PrincipalId,
        config: LoopConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kernel,
            agent,
            config,
            cancel,
        }
    }

    /// Drive iterations until cancelled or the agent disappears.
    ///
    /// Cancellation refuses new iterations and is honored at every
    /// suspension point (pacing sleeps, hibernation); an in-flight
    /// iteration completes its dispatch so effects are never torn. The
    /// manager's grace period bounds how long that can take.
    pub async fn run(self) {
        tracing::info!(agent = %self.agent, "loop started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let pace = self.iterate().await;
            match pace {
                Pace::Normal => {
                    self.sleep(Duration::from_millis(self.config.iteration_delay_ms))
                        .await;
                }
                Pace::Backoff(wait) => {
                    tracing::debug!(agent = %self.agent, ?wait, "rate-limited, backing off");
                    self.sleep(wait).await;
                }
                Pace::Starved => {
                    if !self.hibernate().await {
                        break;
                    }
                }
                Pace::Stop => break,
            }
        }
        tracing::info!(agent = %self.agent, "loop stopped");
    }

    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(duration) => {}
        }
    }

    /// One OODA iteration.
    async fn iterate(&self) -> Pace {
        // Observe.
        let Ok(artifact) = self
            .kernel
            .store()
            .get_live(&ArtifactId::from(&self.agent))
            .await
        else {
            return Pace::Stop;
        };
        let Ok(balances) = self.kernel.ledger().balances(&self.agent).await else {
            return Pace::Stop;
        };
        let mut state = self.load_state(&artifact).await;

        let llm_dependent = self.is_llm_dependent(&artifact).await;
        if llm_dependent && balances.llm_dollar_budget <= Decimal::ZERO {
            return Pace::Starved;
        }

        let recent = self
            .kernel
            .events()
            .read_since(
                self.kernel
                    .events()
                    .head_seq()
                    .saturating_sub(self.config.observe_events as u64),
                &EventFilter::default(),
                self.config.observe_events,
            )
            .await;
        let mut context = json!({
            "agent": self.agent,
            "balances": {
                "scrip": balances.scrip,
                "llm_dollar_budget": balances.llm_dollar_budget.to_string(),
                "disk_quota": balances.disk_quota,
            },
            "memory": state.working_memory,
            "recent_events": recent
                .iter()
                .map(|e| json!({"seq": e.seq, "type": e.kind, "principal": e.principal_id}))
                .collect::<Vec<_>>(),
        });

        // Think + decide.
        let intents = match self.decide(&artifact, &mut state, &mut context).await {
            Ok(intents) => intents,
            Err(pace) => {
                self.save_state(&artifact, &state).await;
                return pace;
            }
        };

        // Act.
        let mut pace = Pace::Normal;
        if intents.is_empty() {
            let result = self
                .kernel
                .dispatch(Intent::Noop {
                    principal_id: self.agent.clone(),
                    reason: Some("nothing to do".into()),
                })
                .await;
            state.record_turn("noop", &result, self.config.max_turn_history);
        }
        for intent in intents.into_iter().take(self.config.max_tool_calls) {
            let operation = intent.operation().to_string();
            let result = self.kernel.dispatch(intent).await;
            if let Some(wait) = backoff_hint(&result) {
                pace = Pace::Backoff(wait);
            }
            state.record_turn(&operation, &result, self.config.max_turn_history);
        }

        // Persist memory for the next iteration.
        if let Some(memory) = context.get("memory") {
            state.working_memory = memory.clone();
        }
        self.save_state(&artifact, &state).await;
        pace
    }

    /// Whether the loop's next action needs the gateway.
    async fn is_llm_dependent(&self, artifact: &Artifact) -> bool {
        if !artifact.has_capability(&Capability::CanCallLlm) {
            return false;
        }
        match self.workflow_of(artifact).await {
            // A workflow is LLM-dependent if any step thinks.
            Some(runner) => runner
                .def()
                .steps
                .iter()
                .any(|s| matches!(s.kind, crate::workflow::StepKind::Llm { .. })),
            // No workflow: the loop thinks directly.
            None => true,
        }
    }

    async fn workflow_of(&self, artifact: &Artifact) -> Option<WorkflowRunner> {
        let workflow_id = artifact.metadata_str("workflow_id")?;
        let workflow = self
            .kernel
            .store()
            .get_live(&ArtifactId::from(workflow_id))
            .await
            .ok()?;
        match WorkflowRunner::from_content(&workflow.content) {
            Ok(runner) => Some(runner),
            Err(err) => {
                tracing::warn!(agent = %self.agent, %err, "malformed workflow, ignoring");
                None
            }
        }
    }

    /// Produce the iteration's intents, either from the attached workflow
    /// or by direct structured tool-calling.
    async fn decide(
        &self,
        artifact: &Artifact,
        state: &mut AgentState,
        context: &mut Value,
    ) -> Result<Vec<Intent>, Pace> {
        if let Some(runner) = self.workflow_of(artifact).await {
            let thinker = GatewayThinker {
                kernel: Arc::clone(&self.kernel),
                agent: self.agent.clone(),
                genesis: is_genesis(artifact),
            };
            let outcome = runner
                .run_iteration(context, &mut state.current_state, &thinker)
                .await;
            return match outcome {
                Ok(IterationOutcome::Emit(mut intent_json)) => {
                    intent_json["principal_id"] = json!(self.agent);
                    match serde_json::from_value::<Intent>(intent_json) {
                        Ok(intent) => Ok(vec![intent]),
                        Err(err) => {
                            tracing::warn!(agent = %self.agent, %err, "workflow emitted a malformed intent");
                            Ok(vec![])
                        }
                    }
                }
                Ok(IterationOutcome::Idle) => Ok(vec![]),
                Err(err) => {
                    tracing::debug!(agent = %self.agent, %err, "workflow iteration failed");
                    if err.to_string().contains("budget exhausted") {
                        Err(Pace::Starved)
                    } else {
                        Ok(vec![])
                    }
                }
            };
        }

        if artifact.has_capability(&Capability::CanCallLlm) {
            return self.think_directly(artifact, context).await;
        }
        Ok(vec![])
    }

    /// Direct structured tool-calling: the model sees the intent set as
    /// tools; its tool calls map 1:1 to dispatcher intents.
    async fn think_directly(
        &self,
        artifact: &Artifact,
        context: &Value,
    ) -> Result<Vec<Intent>, Pace> {
        let system = match artifact.metadata_str("system_prompt_id") {
            Some(prompt_id) => self
                .kernel
                .store()
                .get_live(&ArtifactId::from(prompt_id))
                .await
                .map(|p| p.content)
                .unwrap_or_default(),
            None => String::new(),
        };
        let mut messages = Vec::new();
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(format!(
            "Current observation:\n{context}\nChoose your next action."
        )));

        let request = ChatRequest {
            model: String::new(),
            messages,
            tools: Some(intent_tools()),
        };
        let outcome = self
            .kernel
            .gateway()
            .call(&self.agent, request, is_genesis(artifact))
            .await;
        let response = match outcome {
            Ok(response) => response,
            Err(err) if err.code() == ErrorCode::BudgetExhausted => return Err(Pace::Starved),
            Err(err) => {
                if let bedrock::GatewayError::RateLimited {
                    retry_after_secs, ..
                } = err
                {
                    return Err(Pace::Backoff(Duration::from_secs(retry_after_secs)));
                }
                tracing::debug!(agent = %self.agent, %err, "think failed");
                return Ok(vec![]);
            }
        };

        let mut intents = Vec::new();
        for call in &response.tool_calls {
            let mut intent_json = call.arguments.clone();
            if !intent_json.is_object() {
                intent_json = json!({});
            }
            intent_json["action_type"] = json!(call.name);
            intent_json["principal_id"] = json!(self.agent);
            match serde_json::from_value::<Intent>(intent_json) {
                Ok(intent) => intents.push(intent),
                Err(err) => {
                    tracing::debug!(agent = %self.agent, tool = %call.name, %err,
                        "dropping malformed tool call");
                }
            }
        }
        // No tool calls: accept a bare JSON intent in the text reply.
        if intents.is_empty()
            && let Ok(mut intent_json) = serde_json::from_str::<Value>(&response.content)
        {
            intent_json["principal_id"] = json!(self.agent);
            if let Ok(intent) = serde_json::from_value::<Intent>(intent_json) {
                intents.push(intent);
            }
        }
        Ok(intents)
    }

    /// The agent's state artifact id.
    fn state_artifact_id(&self, artifact: &Artifact) -> ArtifactId {
        artifact
            .metadata_str("state_artifact_id")
            .map(ArtifactId::from)
            .unwrap_or_else(|| ArtifactId::new(format!("{}.state", self.agent)))
    }

    async fn load_state(&self, artifact: &Artifact) -> AgentState {
        let id = self.state_artifact_id(artifact);
        match self.kernel.store().get_live(&id).await {
            Ok(state_artifact) => AgentState::from_content(&state_artifact.content),
            Err(_) => AgentState::default(),
        }
    }

    /// Persist state through an ordinary write, so the agent's own access
    /// rules and quotas apply.
    async fn save_state(&self, artifact: &Artifact, state: &AgentState) {
        let id = self.state_artifact_id(artifact);
        let result = self
            .kernel
            .dispatch(Intent::Write {
                principal_id: self.agent.clone(),
                spec: WriteSpec {
                    artifact_id: id.clone(),
                    content: state.to_content(),
                    kind: ArtifactKind::Data,
                    interface: Some(Interface::data("agent loop state")),
                    code: None,
                    metadata: Default::default(),
                    access_contract_id: None,
                    has_standing: false,
                    has_loop: false,
                },
            })
            .await;
        if !result.success {
            tracing::warn!(agent = %self.agent, message = %result.message,
                "failed to persist loop state");
        }
    }

    /// Suspend until an inbound budget transfer or cancellation. Returns
    /// false when cancelled.
    async fn hibernate(&self) -> bool {
        let draft = EventDraft::new(
            EventKind::AgentFrozen,
            self.agent.clone(),
            json!({"reason": "budget_exhausted"}),
        );
        if let Err(err) = self.kernel.events().append(draft).await {
            tracing::warn!(%err, "failed to log agent_frozen");
        }
        tracing::info!(agent = %self.agent, "hibernating until budget arrives");

        let filter = EventFilter {
            kinds: vec![EventKind::Action],
            ..Default::default()
        };
        let mut cursor = self
            .kernel
            .events()
            .subscribe_from(filter, self.kernel.events().head_seq());

        // A transfer may have landed between the starvation check and the
        // subscription; re-check so the wake-up cannot be missed.
        let already_funded = self
            .kernel
            .ledger()
            .balances(&self.agent)
            .await
            .map(|b| b.llm_dollar_budget > Decimal::ZERO)
            .unwrap_or(false);
        if !already_funded {
            loop {
                let event = tokio::select! {
                    () = self.cancel.cancelled() => return false,
                    event = cursor.next() => event,
                };
                let Some(event) = event else { return false };
                let intent = &event.data["intent"];
                let woken = intent["action_type"] == "transfer"
                    && intent["to"] == json!(self.agent)
                    && intent["resource"] == "llm_budget"
                    && event.data["result"]["success"] == json!(true);
                if woken {
                    break;
                }
            }
        }

        let draft = EventDraft::new(
            EventKind::AgentUnfrozen,
            self.agent.clone(),
            json!({"reason": "budget_received"}),
        );
        if let Err(err) = self.kernel.events().append(draft).await {
            tracing::warn!(%err, "failed to log agent_unfrozen");
        }
        tracing::info!(agent = %self.agent, "woke from hibernation");
        true
    }
}

/// The intent set exposed to the model as tools.
#[must_use]
pub fn intent_tools() -> Vec<ToolSpec> {
    let object = |required: &[&str], properties: Value| {
        json!({"type": "object", "required": required, "properties": properties})
    };
    vec![
        ToolSpec {
            name: "read".into(),
            description: "Read an artifact's content and interface".into(),
            parameters: object(&["artifact_id"], json!({"artifact_id": {"type": "string"}})),
        },
        ToolSpec {
            name: "write".into(),
            description: "Create or update an artifact".into(),
            parameters: object(
                &["artifact_id", "kind"],
                json!({
                    "artifact_id": {"type": "string"},
                    "content": {"type": "string"},
                    "kind": {"type": "string"},
                }),
            ),
        },
        ToolSpec {
            name: "invoke".into(),
            description: "Invoke an executable artifact".into(),
            parameters: object(
                &["artifact_id"],
                json!({
                    "artifact_id": {"type": "string"},
                    "method": {"type": "string"},
                    "args": {"type": "object"},
                }),
            ),
        },
        ToolSpec {
            name: "transfer".into(),
            description: "Move scrip or another stock to a principal".into(),
            parameters: object(
                &["to", "amount", "resource"],
                json!({
                    "to": {"type": "string"},
                    "amount": {"type": "number"},
                    "resource": {"type": "string"},
                }),
            ),
        },
        ToolSpec {
            name: "delete".into(),
            description: "Soft-delete an artifact you may delete".into(),
            parameters: object(&["artifact_id"], json!({"artifact_id": {"type": "string"}})),
        },
        ToolSpec {
            name: "query".into(),
            description: "List artifacts, principals, balances, or events".into(),
            parameters: object(
                &["query_type"],
                json!({
                    "query_type": {"type": "string"},
                    "filter": {"type": "object"},
                }),
            ),
        },
        ToolSpec {
            name: "noop".into(),
            description: "Do nothing this turn".into(),
            parameters: object(&[], json!({"reason": {"type": "string"}})),
        },
    ]
}

/// A retry hint from a rate-limited result.
fn backoff_hint(result: &ActionResult) -> Option<Duration> {
    let error = result.error.as_ref()?;
    if error.error_code != ErrorCode::QuotaExceeded {
        return None;
    }
    let secs = error
        .error_details
        .get("retry_after")
        .and_then(|v| v.as_u64())
        .unwrap_or(1);
    Some(Duration::from_secs(secs))
}

fn is_genesis(artifact: &Artifact) -> bool {
    artifact
        .metadata
        .get("genesis")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_match_intent_operations() {
        let names: Vec<String> = intent_tools().into_iter().map(|t| t.name).collect();
        for name in ["read", "write", "invoke", "transfer", "delete", "query", "noop"] {
            assert!(names.contains(&name.to_string()), "missing {name}");
        }
    }

    #[test]
    fn backoff_hint_reads_retry_after() {
        let result = ActionResult::fail_with(
            ErrorCode::QuotaExceeded,
            "rate limited",
            json!({"retry_after": 42}),
        );
        assert_eq!(backoff_hint(&result), Some(Duration::from_secs(42)));
        assert_eq!(backoff_hint(&ActionResult::ok("fine")), None);
        assert_eq!(
            backoff_hint(&ActionResult::fail(ErrorCode::Deleted, "gone")),
            None
        );
    }
}
