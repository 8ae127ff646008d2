//! Guarded model calls shared by the model-backed verification steps.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ModelsConfig;
use crate::errors::DependencyError;
use crate::gateway::{ModelGateway, ModelRequest, ModelTier, TokenUsage, extract_json};
use crate::resilience::ServiceRegistry;

/// Verification steps ask for small JSON verdicts.
const STEP_MAX_OUTPUT_TOKENS: u32 = 1024;

#[derive(Clone)]
pub struct StepModels {
    registry: Arc<ServiceRegistry>,
    gateway: Arc<dyn ModelGateway>,
    models: ModelsConfig,
}

impl StepModels {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        gateway: Arc<dyn ModelGateway>,
        models: ModelsConfig,
    ) -> Self {
        Self {
            registry,
            gateway,
            models,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Invoke `tier` and return the JSON object in its answer. An answer
    /// without JSON is reported as a failed call, so the breaker does not
    /// see it but the step does.
    pub async fn ask(
        &self,
        tier: ModelTier,
        system: &str,
        prompt: String,
        schema: Value,
        thinking_budget: Option<u32>,
    ) -> Result<(Value, TokenUsage), DependencyError> {
        let request = ModelRequest::new(tier, self.models.model_for(tier), system, prompt)
            .with_max_output_tokens(STEP_MAX_OUTPUT_TOKENS)
            .with_thinking_budget(thinking_budget)
            .with_schema(schema);
        let gateway = &self.gateway;
        let response = self
            .registry
            .call_with_retry(tier.dependency(), self.models.request_timeout(), || {
                let request = &request;
                async move { gateway.invoke(request).await.map_err(anyhow::Error::from) }
            })
            .await?;
        let usage = response.usage();
        match extract_json(&response.text) {
            Some(value) => Ok((value, usage)),
            None => Err(DependencyError::Failed {
                dependency: tier.dependency(),
                source: anyhow::anyhow!("model answer contained no JSON object"),
            }),
        }
    }
}

/// `value[key]` as a probability, clamped to [0, 1].
pub fn probability(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64).map(|v| v.clamp(0.0, 1.0))
}

pub fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("No reasoning provided")
        .to_string()
}
