//! Model pricing in nanodollars (1e-9 USD) per token.
//!
//! Ledger amounts are integers so running totals never drift. Thinking
//! tokens are billed as output tokens by the provider and arrive in
//! `output_tokens`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// Claude Haiku 4.5: $1/1M input, $5/1M output
const HAIKU_4_5: ModelPricing = ModelPricing::new(1_000, 5_000);
// Claude Sonnet 4.5: $3/1M input, $15/1M output
const SONNET_4_5: ModelPricing = ModelPricing::new(3_000, 15_000);
// Claude Opus 4.1: $15/1M input, $75/1M output
const OPUS_4_1: ModelPricing = ModelPricing::new(15_000, 75_000);

/// Prefix-matched so dated snapshots (`claude-haiku-4-5-20251001`) resolve.
const PRICING: &[(&str, ModelPricing)] = &[
    ("claude-haiku-4-5", HAIKU_4_5),
    ("claude-sonnet-4-5", SONNET_4_5),
    ("claude-opus-4-1", OPUS_4_1),
];

pub fn get_pricing(model: &str) -> Option<ModelPricing> {
    PRICING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, pricing)| *pricing)
}

/// Cost of one call. Unknown models are charged at the most expensive known
/// rate so the cost cap errs toward firing early.
pub fn cost_nanos(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(OPUS_4_1)
        .calculate_cost(input_tokens, output_tokens)
}

pub fn nanos_to_usd(nanos: i64) -> f64 {
    nanos as f64 / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_snapshots_resolve_by_prefix() {
        assert_eq!(get_pricing("claude-haiku-4-5-20251001"), Some(HAIKU_4_5));
        assert!(get_pricing("gpt-4o").is_none());
    }

    #[test]
    fn one_million_output_tokens_on_opus_costs_75_usd() {
        let nanos = cost_nanos("claude-opus-4-1", 0, 1_000_000);
        assert_eq!(nanos, 75_000_000_000);
        assert!((nanos_to_usd(nanos) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_models_use_the_highest_rate() {
        assert_eq!(
            cost_nanos("mystery-model", 100, 100),
            cost_nanos("claude-opus-4-1", 100, 100)
        );
    }
}
