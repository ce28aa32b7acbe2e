//! The gateway itself — rate metering, budget reservation, settlement.

use crate::provider::{
    estimate_tokens, ChatMessage, ChatRequest, LlmProvider, LlmResponse,
};
use agora_events::EventLog;
use agora_world::{Ledger, RateTracker};
use bedrock::{EventDraft, EventKind, GatewayError, PrincipalId, ResourceKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Which callers receive the mandatory prompt frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionScope {
    /// Nobody.
    #[default]
    None,
    /// Genesis-tagged callers only.
    Genesis,
    /// Every caller.
    All,
}

/// Prompt-injection frame applied to outbound requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptInjection {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Who gets the frame.
    #[serde(default)]
    pub scope: InjectionScope,
    /// System text prepended to every framed request.
    #[serde(default)]
    pub mandatory_prefix: String,
    /// System text appended to every framed request.
    #[serde(default)]
    pub mandatory_suffix: String,
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Wall-clock cap on one provider call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Prompt-injection frame.
    #[serde(default)]
    pub prompt_injection: PromptInjection,
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            prompt_injection: PromptInjection::default(),
        }
    }
}

/// The kernel syscall surface for external LLM APIs.
///
/// Caller-pays discipline, in order:
/// 1. meter `llm_call_rate` (one call) and `llm_token_rate` (estimated
///    tokens) — over capacity refuses before anything is spent;
/// 2. reserve against the caller's dollar budget using the provider's
///    estimate — insufficient budget refuses **before** the external call;
/// 3. call the provider under a timeout;
/// 4. settle at the provider-reported cost, clamped so the budget never
///    goes negative, and log `thinking` + `resource_consumed` events.
///
/// Capability gating (`can_call_llm`) happens at the sandbox handle, which
/// knows the running artifact; the gateway only sees verified principals.
pub struct Gateway {
    provider: Arc<dyn LlmProvider>,
    ledger: Arc<Ledger>,
    rates: Arc<RateTracker>,
    events: Arc<EventLog>,
    config: GatewayConfig,
    cumulative_cost: Mutex<Decimal>,
}

impl Gateway {
    /// Wire a gateway to the world.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        ledger: Arc<Ledger>,
        rates: Arc<RateTracker>,
        events: Arc<EventLog>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            provider,
            ledger,
            rates,
            events,
            config,
            cumulative_cost: Mutex::new(Decimal::ZERO),
        }
    }

    /// Total dollars settled through this gateway since boot.
    pub async fn cumulative_cost(&self) -> Decimal {
        *self.cumulative_cost.lock().await
    }

    /// Restore the cumulative counter from a checkpoint.
    pub async fn set_cumulative_cost(&self, cost: Decimal) {
        *self.cumulative_cost.lock().await = cost;
    }

    fn frame(&self, mut request: ChatRequest, genesis_caller: bool) -> ChatRequest {
        let injection = &self.config.prompt_injection;
        let applies = injection.enabled
            && match injection.scope {
                InjectionScope::None => false,
                InjectionScope::Genesis => genesis_caller,
                InjectionScope::All => true,
            };
        if applies {
            if !injection.mandatory_prefix.is_empty() {
                request
                    .messages
                    .insert(0, ChatMessage::system(injection.mandatory_prefix.clone()));
            }
            if !injection.mandatory_suffix.is_empty() {
                request
                    .messages
                    .push(ChatMessage::system(injection.mandatory_suffix.clone()));
            }
        }
        request
    }

    /// Perform one metered, billed LLM call on behalf of `caller`.
    pub async fn call(
        &self,
        caller: &PrincipalId,
        request: ChatRequest,
        genesis_caller: bool,
    ) -> Result<LlmResponse, GatewayError> {
        let request = self.frame(request, genesis_caller);
        let now = Instant::now();

        // Renewable windows first: nothing is spent on refusal.
        if let Err(err) =
            self.rates
                .consume_or_err(caller, ResourceKind::LlmCallRate, 1, now)
        {
            return Err(rate_error(err));
        }
        let estimated_tokens = estimate_tokens(&request);
        if let Err(err) = self.rates.consume_or_err(
            caller,
            ResourceKind::LlmTokenRate,
            estimated_tokens,
            now,
        ) {
            return Err(rate_error(err));
        }

        // Depletable budget: refuse before the external call.
        let estimate = self.provider.estimate_cost(&request);
        let covered = self
            .ledger
            .covers_llm_estimate(caller, estimate)
            .await
            .map_err(|e| GatewayError::Other(Box::new(e)))?;
        if !covered {
            return Err(GatewayError::BudgetExhausted(caller.clone()));
        }

        let model = request.model.clone();
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let reply = match tokio::time::timeout(timeout, self.provider.complete(request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => return Err(GatewayError::Provider(err.to_string())),
            Err(_) => {
                return Err(GatewayError::Provider(format!(
                    "provider timed out after {}s",
                    self.config.request_timeout_secs
                )))
            }
        };

        // Settle at actual cost; the clamp keeps the budget non-negative
        // when the estimate under-reserved.
        let debited = self
            .ledger
            .settle_llm(caller, reply.cost)
            .await
            .map_err(|e| GatewayError::Other(Box::new(e)))?;
        *self.cumulative_cost.lock().await += debited;

        // Token correction: the estimate was already recorded, count only
        // the excess against the window.
        if reply.usage.total_tokens > estimated_tokens {
            let _ = self.rates.consume(
                caller,
                ResourceKind::LlmTokenRate,
                reply.usage.total_tokens - estimated_tokens,
                Instant::now(),
            );
        }

        tracing::debug!(
            caller = %caller,
            tokens = reply.usage.total_tokens,
            cost = %debited,
            "llm call settled"
        );

        let thinking = EventDraft::new(
            EventKind::Thinking,
            caller.clone(),
            serde_json::json!({
                "model": model,
                "usage": reply.usage,
                "cost": debited.to_string(),
                "tool_calls": reply.tool_calls.len(),
            }),
        );
        self.events
            .append(thinking)
            .await
            .map_err(|e| GatewayError::Other(Box::new(e)))?;
        let consumed = EventDraft::new(
            EventKind::ResourceConsumed,
            caller.clone(),
            serde_json::json!({
                "resource": "llm_budget",
                "amount": debited.to_string(),
            }),
        );
        self.events
            .append(consumed)
            .await
            .map_err(|e| GatewayError::Other(Box::new(e)))?;

        Ok(LlmResponse::from_reply(reply, debited))
    }

    /// [`call`](Self::call) with errors folded into the structured wire
    /// body agents receive inside the sandbox.
    pub async fn call_wire(
        &self,
        caller: &PrincipalId,
        request: ChatRequest,
        genesis_caller: bool,
    ) -> LlmResponse {
        match self.call(caller, request, genesis_caller).await {
            Ok(response) => response,
            Err(err) => {
                let code = err.code();
                tracing::debug!(caller = %caller, %err, "llm call refused");
                LlmResponse::from_error(
                    serde_json::to_value(code)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_owned))
                        .unwrap_or_else(|| "runtime_error".into()),
                )
            }
        }
    }
}

fn rate_error(err: bedrock::WorldError) -> GatewayError {
    match err {
        bedrock::WorldError::RateExceeded {
            resource,
            retry_after_secs,
        } => GatewayError::RateLimited {
            resource,
            retry_after_secs,
        },
        other => GatewayError::Other(Box::new(other)),
    }
}
