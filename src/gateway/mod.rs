//! Model provider gateway.
//!
//! Two model tiers are exposed: a fast/cheap model for classification-style
//! work and a slow/high-reasoning model for drafting and adversarial review.
//! The executor and the verification pipeline only see the `ModelGateway`
//! trait; breaker, rate limiting and timeouts are applied by the caller
//! through `ServiceRegistry`.

pub mod anthropic;
pub mod error;
pub mod pricing;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::resilience::Dependency;

pub use anthropic::AnthropicGateway;
pub use error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Slow,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }

    /// The breaker/rate-limit key guarding this tier.
    pub fn dependency(&self) -> Dependency {
        match self {
            Self::Fast => Dependency::FastModel,
            Self::Slow => Dependency::SlowModel,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured model invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub tier: ModelTier,
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_output_tokens: u32,
    /// Extended-reasoning allowance; not a different model.
    pub thinking_budget: Option<u32>,
    /// JSON schema the answer is expected to follow.
    pub expected_schema: Option<serde_json::Value>,
}

impl ModelRequest {
    pub fn new(tier: ModelTier, model: &str, system: &str, prompt: String) -> Self {
        Self {
            tier,
            model: model.to_string(),
            system: system.to_string(),
            prompt,
            max_output_tokens: 4096,
            thinking_budget: None,
            expected_schema: None,
        }
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn with_thinking_budget(mut self, budget: Option<u32>) -> Self {
        self.thinking_budget = budget;
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.expected_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub model: String,
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ModelResponse {
    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            model: self.model.clone(),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

/// Tokens spent on one invocation; what the cost ledger charges for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError>;
}

/// Pull a JSON object out of a model answer that may wrap it in prose or a
/// fenced code block.
pub fn extract_json(response: &str) -> Option<serde_json::Value> {
    if let Some(start) = response.find("```json") {
        let after_marker = &response[start + 7..];
        if let Some(end) = after_marker.find("```") {
            if let Ok(value) = serde_json::from_str(after_marker[..end].trim()) {
                return Some(value);
            }
        }
    }

    if let Some(start) = response.find("```") {
        let after_marker = &response[start + 3..];
        if let Some(end) = after_marker.find("```") {
            if let Some(brace) = after_marker[..end].find('{') {
                if let Ok(value) = serde_json::from_str(after_marker[brace..end].trim()) {
                    return Some(value);
                }
            }
        }
    }

    let start = response.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in response[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&response[start..start + i + 1]).ok();
                }
            }
            _ => {}
        }
    }
    None
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let text = "Here you go:\n```json\n{\"grade\": \"B+\"}\n```\nThanks";
        let value = extract_json(text).unwrap();
        assert_eq!(value["grade"], "B+");
    }

    #[test]
    fn extracts_bare_object_with_braces_in_strings() {
        let text = r#"Result: {"note": "use {curly} braces", "score": 0.9} trailing"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["score"], 0.9);
    }

    #[test]
    fn prose_without_json_yields_none() {
        assert!(extract_json("The motion reads well.").is_none());
    }

    #[test]
    fn model_tiers_map_to_distinct_dependencies() {
        assert_eq!(ModelTier::Fast.dependency(), Dependency::FastModel);
        assert_eq!(ModelTier::Slow.dependency(), Dependency::SlowModel);
    }
}
