//! Anthropic Messages API provider.

use crate::provider::{
    ChatReply, ChatRequest, LlmProvider, ProviderError, TokenUsage, ToolCall,
};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Default model used when the request does not specify one.
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default API base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Per-million-token prices used to compute actual call cost.
/// `(model prefix, input $/MTok, output $/MTok)`.
const PRICING: &[(&str, i64, i64)] = &[
    ("claude-opus", 15, 75),
    ("claude-sonnet", 3, 15),
    ("claude-haiku", 1, 5),
];

/// Client for the Anthropic Messages API.
///
/// # Example
///
/// ```no_run
/// use agora_gateway::Anthropic;
///
/// let provider = Anthropic::new("sk-ant-...")
///     .model("claude-haiku-4-5")
///     .base_url("http://localhost:9999");
/// ```
pub struct Anthropic {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl Anthropic {
    /// A client with the given API key and default model/base URL.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the default model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the API base URL (mock servers, proxies).
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Map a [`ChatRequest`] to the Messages API body. System messages
    /// become the top-level `system` field; tools map to the tools array.
    fn to_body(&self, request: &ChatRequest) -> serde_json::Value {
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": 4096,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system.join("\n"));
        }
        if let Some(tools) = &request.tools {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
        }
        body
    }

    /// Dollar cost from reported usage and the pricing table.
    fn cost_for(model: &str, usage: TokenUsage) -> Decimal {
        let (input_rate, output_rate) = PRICING
            .iter()
            .find(|(prefix, _, _)| model.starts_with(prefix))
            .map(|(_, i, o)| (*i, *o))
            .unwrap_or((3, 15));
        let million = Decimal::from(1_000_000u64);
        Decimal::from(usage.prompt_tokens) * Decimal::from(input_rate) / million
            + Decimal::from(usage.completion_tokens) * Decimal::from(output_rate) / million
    }

    fn parse_reply(model: &str, json: &serde_json::Value) -> Result<ChatReply, ProviderError> {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in json["content"].as_array().into_iter().flatten() {
            match block["type"].as_str() {
                Some("text") => {
                    content.push_str(block["text"].as_str().unwrap_or_default());
                }
                Some("tool_use") => tool_calls.push(ToolCall {
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block["input"].clone(),
                }),
                _ => {}
            }
        }

        let prompt_tokens = json["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = json["usage"]["output_tokens"].as_u64().unwrap_or(0);
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        };

        Ok(ChatReply {
            content,
            usage,
            cost: Self::cost_for(model, usage),
            tool_calls,
        })
    }
}

#[async_trait]
impl LlmProvider for Anthropic {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, ProviderError> {
        let url = self.messages_url();
        let body = self.to_body(&request);
        let model = body["model"].as_str().unwrap_or(DEFAULT_MODEL).to_string();

        tracing::debug!(url = %url, model = %model, "sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::AuthFailed(text));
        }
        if !status.is_success() {
            return Err(ProviderError::RequestFailed(format!("{status}: {text}")));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Self::parse_reply(&model, &json)
    }

    fn estimate_cost(&self, request: &ChatRequest) -> Decimal {
        // Reserve as if the whole prompt were input tokens plus a modest
        // completion; settlement replaces this with the reported usage.
        let prompt = crate::provider::estimate_tokens(request);
        let usage = TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: 512,
            total_tokens: prompt + 512,
        };
        let model = if request.model.is_empty() {
            &self.model
        } else {
            &request.model
        };
        Self::cost_for(model, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    #[test]
    fn defaults_are_set() {
        let provider = Anthropic::new("test-key");
        assert_eq!(provider.model, DEFAULT_MODEL);
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(
            provider.messages_url(),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn builder_overrides() {
        let provider = Anthropic::new("k").model("claude-haiku-4-5").base_url("http://x");
        assert_eq!(provider.model, "claude-haiku-4-5");
        assert_eq!(provider.messages_url(), "http://x/v1/messages");
    }

    #[test]
    fn system_messages_lift_to_the_system_field() {
        let provider = Anthropic::new("k");
        let body = provider.to_body(&ChatRequest {
            model: String::new(),
            messages: vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("hello"),
            ],
            tools: None,
        });
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn cost_uses_the_pricing_table() {
        let usage = TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 0,
            total_tokens: 1_000_000,
        };
        assert_eq!(
            Anthropic::cost_for("claude-sonnet-4-20250514", usage),
            Decimal::from(3)
        );
        let usage = TokenUsage {
            prompt_tokens: 0,
            completion_tokens: 1_000_000,
            total_tokens: 1_000_000,
        };
        assert_eq!(Anthropic::cost_for("claude-opus-4-5", usage), Decimal::from(75));
    }

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let json = serde_json::json!({
            "content": [
                {"type": "text", "text": "thinking done"},
                {"type": "tool_use", "name": "transfer", "input": {"to": "bob"}},
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let reply = Anthropic::parse_reply("claude-sonnet-4-20250514", &json).unwrap();
        assert_eq!(reply.content, "thinking done");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.usage.total_tokens, 15);
        assert!(reply.cost > Decimal::ZERO);
    }
}
