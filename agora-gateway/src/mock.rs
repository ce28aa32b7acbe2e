//! Scripted provider for tests — no network, no keys.

use crate::provider::{ChatReply, ChatRequest, LlmProvider, ProviderError, TokenUsage, ToolCall};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A provider that replays scripted replies in order, then repeats the
/// last one. Records every request it saw.
pub struct MockProvider {
    script: Mutex<VecDeque<ChatReply>>,
    fallback: ChatReply,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    /// A mock that always returns `text` at the given cost.
    #[must_use]
    pub fn text(text: &str, cost: Decimal) -> Self {
        Self::from_reply(ChatReply {
            content: text.to_string(),
            usage: TokenUsage {
                prompt_tokens: 25,
                completion_tokens: 10,
                total_tokens: 35,
            },
            cost,
            tool_calls: vec![],
        })
    }

    /// A mock that always returns one tool call at the given cost.
    #[must_use]
    pub fn tool_call(name: &str, arguments: serde_json::Value, cost: Decimal) -> Self {
        Self::from_reply(ChatReply {
            content: String::new(),
            usage: TokenUsage {
                prompt_tokens: 25,
                completion_tokens: 10,
                total_tokens: 35,
            },
            cost,
            tool_calls: vec![ToolCall {
                name: name.to_string(),
                arguments,
            }],
        })
    }

    /// A mock with an explicit fallback reply.
    #[must_use]
    pub fn from_reply(reply: ChatReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply to be returned before the fallback kicks in.
    #[must_use]
    pub fn then(self, reply: ChatReply) -> Self {
        self.script.lock().expect("mock poisoned").push_back(reply);
        self
    }

    /// Requests the mock has served, in order.
    #[must_use]
    pub fn seen(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("mock poisoned").clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        self.requests.lock().expect("mock poisoned").push(request);
        let scripted = self.script.lock().expect("mock poisoned").pop_front();
        Ok(scripted.unwrap_or_else(|| self.fallback.clone()))
    }

    fn estimate_cost(&self, _request: &ChatRequest) -> Decimal {
        // Estimate exactly what the next reply will cost, which makes
        // budget-refusal tests deterministic.
        self.script
            .lock()
            .expect("mock poisoned")
            .front()
            .map(|r| r.cost)
            .unwrap_or(self.fallback.cost)
    }
}
