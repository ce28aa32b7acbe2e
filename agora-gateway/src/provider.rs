//! Provider trait and the gateway wire contract.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One message in a conversation sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Plain text content.
    pub content: String,
}

impl ChatMessage {
    /// A `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    /// A `system` message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// An `assistant` message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A tool the model may call. Tool calls map 1:1 to dispatcher intents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: serde_json::Value,
}

/// A tool call returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the called tool.
    pub name: String,
    /// Arguments as one JSON object.
    pub arguments: serde_json::Value,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u64,
    /// Tokens generated.
    pub completion_tokens: u64,
    /// Sum of the above.
    pub total_tokens: u64,
}

/// Gateway input: `{model, messages, tools?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier; empty means the provider default.
    #[serde(default)]
    pub model: String,
    /// The conversation.
    pub messages: Vec<ChatMessage>,
    /// Optional tool schemas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
}

/// What a provider returned for one completed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    /// The model's text content.
    pub content: String,
    /// Token accounting.
    pub usage: TokenUsage,
    /// Actual dollar cost of the call.
    pub cost: Decimal,
    /// Tool calls, possibly empty.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Gateway output, as agents see it: `{success, content, usage, cost,
/// tool_calls?, error?}`. Errors are a structured body, never a panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Whether the call completed.
    pub success: bool,
    /// Model text (empty on failure).
    #[serde(default)]
    pub content: String,
    /// Token accounting (zeroes on failure).
    #[serde(default)]
    pub usage: TokenUsage,
    /// Dollars actually debited from the caller.
    #[serde(default)]
    pub cost: Decimal,
    /// Tool calls, when the model produced any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Machine-parseable error code string on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LlmResponse {
    /// Successful response from a provider reply, with the debited cost.
    #[must_use]
    pub fn from_reply(reply: ChatReply, debited: Decimal) -> Self {
        Self {
            success: true,
            content: reply.content,
            usage: reply.usage,
            cost: debited,
            tool_calls: reply.tool_calls,
            error: None,
        }
    }

    /// Structured error body.
    pub fn from_error(code: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            usage: TokenUsage::default(),
            cost: Decimal::ZERO,
            tool_calls: vec![],
            error: Some(code.into()),
        }
    }
}

/// Errors from LLM providers.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP or network request failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Provider rate-limited the request.
    #[error("rate limited")]
    RateLimited,

    /// Authentication/authorization failed.
    #[error("auth failed: {0}")]
    AuthFailed(String),

    /// Could not parse the provider's response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    /// Whether retrying this request might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::RequestFailed(_))
    }
}

/// LLM provider interface.
///
/// Object-safe — the gateway holds `Arc<dyn LlmProvider>` so the backing
/// API is a boot-time choice. Implementations map [`ChatRequest`] to their
/// wire format and report actual cost back in the reply.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request.
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, ProviderError>;

    /// Upper-bound cost estimate used for the pre-call budget reservation.
    ///
    /// The default is deliberately conservative: a flat floor. Providers
    /// with pricing tables refine it from the request size.
    fn estimate_cost(&self, request: &ChatRequest) -> Decimal {
        let _ = request;
        // $0.0001 floor keeps zero-budget callers out without blocking
        // modestly funded ones.
        Decimal::new(1, 4)
    }
}

/// Crude token estimate for rate-window reservation: ~4 chars per token.
#[must_use]
pub fn estimate_tokens(request: &ChatRequest) -> u64 {
    let chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
    (chars as u64 / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes_serialize_cleanly() {
        let response = LlmResponse {
            success: true,
            content: "hi".into(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
            },
            cost: Decimal::new(5, 4),
            tool_calls: vec![ToolCall {
                name: "transfer".into(),
                arguments: serde_json::json!({"to": "bob", "amount": 1}),
            }],
            error: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["usage"]["total_tokens"], 12);
        assert_eq!(json["cost"], "0.0005");
        assert_eq!(json["tool_calls"][0]["name"], "transfer");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_body_is_structured() {
        let json = serde_json::to_value(LlmResponse::from_error("budget_exhausted")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "budget_exhausted");
    }

    #[test]
    fn token_estimate_scales_with_content() {
        let request = ChatRequest {
            model: String::new(),
            messages: vec![ChatMessage::user("x".repeat(400))],
            tools: None,
        };
        assert_eq!(estimate_tokens(&request), 100);
    }

    #[test]
    fn provider_error_retryability() {
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::RequestFailed("timeout".into()).is_retryable());
        assert!(!ProviderError::AuthFailed("bad key".into()).is_retryable());
    }
}
