#![deny(missing_docs)]
//! The LLM gateway — external model APIs exposed as a kernel syscall.
//!
//! The gateway is the only path from the world to an external model. It is
//! capability-gated (the sandbox refuses `syscall_llm` for artifacts
//! without `can_call_llm`), rate-metered (`llm_call_rate`,
//! `llm_token_rate`), and caller-pays: the verified caller's dollar budget
//! is reserved before the external call and settled at the provider's
//! reported cost.
//!
//! [`LlmProvider`] is the backend seam. [`Anthropic`] talks to the
//! Messages API over `reqwest`; [`MockProvider`] replays scripted replies
//! for tests. Both report actual cost so billing is uniform.

pub mod anthropic;
pub mod gateway;
pub mod mock;
pub mod provider;

pub use anthropic::Anthropic;
pub use gateway::{Gateway, GatewayConfig, InjectionScope, PromptInjection};
pub use mock::MockProvider;
pub use provider::{
    estimate_tokens, ChatMessage, ChatReply, ChatRequest, LlmProvider, LlmResponse,
    ProviderError, TokenUsage, ToolCall, ToolSpec,
};
