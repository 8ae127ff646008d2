//! Messages API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ModelGateway, ModelRequest, ModelResponse, ProviderError};
use crate::config::ModelsConfig;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicGateway {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl AnthropicGateway {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config("API key is empty".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Build from config, reading the key from the configured variable.
    pub fn from_config(config: &ModelsConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviderError::Config(format!("{} is not set", config.api_key_env))
        })?;
        Self::new(&config.api_base, &api_key, config.request_timeout())
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn build_body(request: &ModelRequest) -> MessagesRequest<'_> {
    let mut system = request.system.clone();
    if let Some(schema) = &request.expected_schema {
        system.push_str("\n\nRespond with a single JSON object matching this schema:\n");
        system.push_str(&schema.to_string());
    }
    // The thinking allowance is spent out of max_tokens.
    let max_tokens = request.max_output_tokens + request.thinking_budget.unwrap_or(0);
    MessagesRequest {
        model: &request.model,
        max_tokens,
        system,
        messages: vec![Message {
            role: "user",
            content: &request.prompt,
        }],
        thinking: request.thinking_budget.map(|budget_tokens| Thinking {
            kind: "enabled",
            budget_tokens,
        }),
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        let body = build_body(request);
        let resp = self
            .client
            .post(format!("{}/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(Duration::ZERO)
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|env| env.error.message)
                .unwrap_or(text);
            return Err(match (status.as_u16(), retry_after) {
                (429, Some(retry_after)) => ProviderError::RateLimited { retry_after },
                (code, _) => ProviderError::from_status(code, message),
            });
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        debug!(
            model = %parsed.model,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "Model call completed"
        );

        Ok(ModelResponse {
            model: parsed.model,
            text,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ModelTier;

    #[test]
    fn thinking_budget_is_added_to_max_tokens() {
        let request = ModelRequest::new(ModelTier::Slow, "claude-opus-4-1", "sys", "draft".into())
            .with_max_output_tokens(4000)
            .with_thinking_budget(Some(10_000));
        let body = build_body(&request);
        assert_eq!(body.max_tokens, 14_000);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["thinking"]["type"], "enabled");
        assert_eq!(json["thinking"]["budget_tokens"], 10_000);
    }

    #[test]
    fn schema_is_appended_to_system_prompt() {
        let request = ModelRequest::new(ModelTier::Fast, "claude-haiku-4-5", "Score it.", "x".into())
            .with_schema(serde_json::json!({"type": "object"}));
        let body = build_body(&request);
        assert!(body.system.contains("\"type\":\"object\""));
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("thinking").is_none());
    }

    #[test]
    fn empty_key_is_a_config_error() {
        let err = AnthropicGateway::new("https://example.test", " ", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
