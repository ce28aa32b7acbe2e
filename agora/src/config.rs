//! The single configuration document for a running world.

use agora_agent::{LoopConfig, LoopManagerConfig};
use agora_gateway::{GatewayConfig, PromptInjection};
use agora_kernel::{ContractDefault, ExecutorConfig, PromptConfig};
use agora_world::RateLimit;
use bedrock::ResourceKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One rate-limit entry: `max_per_window` per `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Maximum total amount inside one window.
    pub max_per_window: u64,
}

impl RateLimitEntry {
    fn to_limit(self) -> RateLimit {
        RateLimit::per_seconds(self.max_per_window, self.window_seconds)
    }
}

/// Rolling-window limits per renewable resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// LLM tokens per window.
    #[serde(default = "default_token_rate")]
    pub llm_token_rate: RateLimitEntry,
    /// LLM calls per window.
    #[serde(default = "default_call_rate")]
    pub llm_call_rate: RateLimitEntry,
    /// Sandbox invocations per window.
    #[serde(default = "default_cpu_rate")]
    pub cpu_rate: RateLimitEntry,
}

fn default_token_rate() -> RateLimitEntry {
    RateLimitEntry {
        window_seconds: 60,
        max_per_window: 100_000,
    }
}

fn default_call_rate() -> RateLimitEntry {
    RateLimitEntry {
        window_seconds: 60,
        max_per_window: 20,
    }
}

fn default_cpu_rate() -> RateLimitEntry {
    RateLimitEntry {
        window_seconds: 60,
        max_per_window: 1_000,
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            llm_token_rate: default_token_rate(),
            llm_call_rate: default_call_rate(),
            cpu_rate: default_cpu_rate(),
        }
    }
}

impl RateLimitingConfig {
    /// The limits table handed to the rate tracker.
    #[must_use]
    pub fn to_limits(&self) -> HashMap<ResourceKind, RateLimit> {
        HashMap::from([
            (ResourceKind::LlmTokenRate, self.llm_token_rate.to_limit()),
            (ResourceKind::LlmCallRate, self.llm_call_rate.to_limit()),
            (ResourceKind::CpuRate, self.cpu_rate.to_limit()),
        ])
    }
}

/// Timeouts that don't belong to a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Grace a loop gets on stop before it is aborted.
    #[serde(default = "default_loop_stop_grace_secs")]
    pub loop_stop_grace_secs: u64,
    /// Overall shutdown budget.
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_secs: u64,
    /// Budget for taking a consistent state snapshot.
    #[serde(default = "default_state_lock_secs")]
    pub state_store_lock_secs: u64,
    /// Wall-clock cap on one gateway request.
    #[serde(default = "default_llm_request_secs")]
    pub llm_request_secs: u64,
}

fn default_loop_stop_grace_secs() -> u64 {
    5
}
fn default_shutdown_secs() -> u64 {
    10
}
fn default_state_lock_secs() -> u64 {
    5
}
fn default_llm_request_secs() -> u64 {
    60
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            loop_stop_grace_secs: default_loop_stop_grace_secs(),
            shutdown_secs: default_shutdown_secs(),
            state_store_lock_secs: default_state_lock_secs(),
            llm_request_secs: default_llm_request_secs(),
        }
    }
}

/// Agent section: prompt limits and loop pacing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    /// System-prompt editing limits.
    #[serde(default)]
    pub system_prompt: PromptConfig,
    /// Per-loop configuration.
    #[serde(default, rename = "loop")]
    pub loop_config: LoopConfig,
}

/// The seeded first citizen, when enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlphaPrimeConfig {
    /// Whether boot seeds the principal.
    #[serde(default)]
    pub enabled: bool,
    /// Its starting scrip.
    #[serde(default = "default_starting_scrip")]
    pub starting_scrip: i64,
    /// Its starting dollar budget.
    #[serde(default = "default_starting_llm_budget")]
    pub starting_llm_budget: Decimal,
    /// Its starting disk quota.
    #[serde(default = "default_starting_disk")]
    pub starting_disk_quota: i64,
}

fn default_starting_scrip() -> i64 {
    1_000
}
fn default_starting_llm_budget() -> Decimal {
    Decimal::ONE
}
fn default_starting_disk() -> i64 {
    1 << 20
}

impl Default for AlphaPrimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            starting_scrip: default_starting_scrip(),
            starting_llm_budget: default_starting_llm_budget(),
            starting_disk_quota: default_starting_disk(),
        }
    }
}

/// Contracts section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Missing-handler policy.
    #[serde(default)]
    pub default_on_missing: ContractDefault,
}

/// Event log section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Directory for JSONL files; `None` keeps the log in memory only.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Stamp events with the debug tick counter.
    #[serde(default)]
    pub debug_ticks: bool,
}

/// The whole configuration document. Every section has defaults, so
/// `KernelConfig::default()` boots a usable in-memory world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Sandbox executor section.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Rolling-window rate limits.
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// Cross-component timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Mandatory prompt framing.
    #[serde(default)]
    pub prompt_injection: PromptInjection,
    /// Agent section.
    #[serde(default)]
    pub agent: AgentSection,
    /// Seeded first citizen.
    #[serde(default)]
    pub alpha_prime: AlphaPrimeConfig,
    /// Access-contract defaults.
    #[serde(default)]
    pub contracts: ContractsConfig,
    /// Event log persistence.
    #[serde(default)]
    pub events: EventsConfig,
}

impl KernelConfig {
    /// The executor config with the contracts default folded in.
    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_on_missing: self.contracts.default_on_missing,
            ..self.executor.clone()
        }
    }

    /// The gateway config assembled from its scattered sections.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            request_timeout_secs: self.timeouts.llm_request_secs,
            prompt_injection: self.prompt_injection.clone(),
        }
    }

    /// The loop manager config.
    #[must_use]
    pub fn manager_config(&self) -> LoopManagerConfig {
        LoopManagerConfig {
            stop_grace_secs: self.timeouts.loop_stop_grace_secs,
            loop_config: self.agent.loop_config.clone(),
        }
    }
}
