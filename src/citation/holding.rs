//! Step 2: does the authority hold what the claim says it holds?
//!
//! A fast-model first stage scores the match. Anything short of a clear
//! pass, and every high-stakes claim, goes to an adversarial second stage
//! on the slow model that is asked to find reasons the match is wrong.

use chrono::Datelike;
use docket_common::Tier;
use serde_json::{Value, json};
use tracing::debug;

use super::existence::{CaseRecord, Treatment};
use super::judge::{StepModels, probability, text_field};
use super::types::Claim;
use crate::errors::DependencyError;
use crate::gateway::{ModelTier, TokenUsage};

pub const PASS_THRESHOLD: f64 = 0.95;
pub const REVIEW_THRESHOLD: f64 = 0.80;
/// Citations older than this with declining treatment are high stakes.
pub const AGED_CITATION_YEARS: i32 = 25;
const ADVERSARIAL_THINKING_BUDGET: u32 = 4096;
/// Opinion text beyond this is cut from prompts.
const MAX_SOURCE_CHARS: usize = 24_000;

const FIRST_STAGE_SYSTEM: &str = "You compare legal propositions against the authority cited for them.";
const SECOND_STAGE_SYSTEM: &str =
    "You are opposing counsel looking for any reason a cited authority does not support a proposition.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldingResult {
    Pass,
    PassWithNotes,
    NeedsReview,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageDecision {
    pub approve: bool,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoldingOutcome {
    pub result: HoldingResult,
    pub score: f64,
    pub first_stage: StageDecision,
    pub second_stage: Option<StageDecision>,
    pub usage: Vec<TokenUsage>,
}

/// Claims that always get the adversarial stage.
pub fn is_high_stakes(claim: &Claim, tier: Tier, treatment: Treatment, current_year: i32) -> bool {
    let aged = claim
        .citation
        .year
        .is_some_and(|year| current_year - year > AGED_CITATION_YEARS);
    claim.sole_authority
        || claim.dispositive_element
        || tier.is_highest()
        || treatment == Treatment::Negative
        || (aged && treatment.is_declining())
}

pub fn needs_second_stage(first_confidence: f64, high_stakes: bool) -> bool {
    high_stakes || (REVIEW_THRESHOLD..PASS_THRESHOLD).contains(&first_confidence)
}

/// Combine the two stages.
///
/// A second-stage rejection never auto-approves. Two low-confidence
/// stages fail.
pub fn resolve(first_confidence: f64, second: Option<&StageDecision>) -> HoldingResult {
    if first_confidence < REVIEW_THRESHOLD {
        return HoldingResult::Fail;
    }
    let high = first_confidence >= PASS_THRESHOLD;
    match second {
        None if high => HoldingResult::Pass,
        None => HoldingResult::NeedsReview,
        Some(s) if !s.approve => HoldingResult::NeedsReview,
        Some(s) if s.confidence >= REVIEW_THRESHOLD => {
            if high {
                HoldingResult::Pass
            } else {
                HoldingResult::PassWithNotes
            }
        }
        Some(_) if high => HoldingResult::NeedsReview,
        Some(_) => HoldingResult::Fail,
    }
}

/// The first-stage confidence, capped by a confident rejection.
pub fn holding_score(first_confidence: f64, second: Option<&StageDecision>) -> f64 {
    match second {
        Some(s) if !s.approve => first_confidence.min(1.0 - s.confidence),
        _ => first_confidence,
    }
}

fn source_excerpt(record: &CaseRecord) -> &str {
    let text = record.text.as_deref().unwrap_or("(no opinion text available)");
    match text.char_indices().nth(MAX_SOURCE_CHARS) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

pub fn build_holding_prompt(claim: &Claim, record: &CaseRecord) -> String {
    format!(
        r#"# Holding Match

Decide whether the cited authority actually holds the proposition below.
A proposition supported only by dicta, a dissent or a different issue does
not match.

## Proposition
{proposition}

## Citation
{citation}

## Authority: {case_name}
{source}

## Output

Respond with ONLY a JSON object in this exact format (no markdown, no explanation):

```json
{{
  "confidence": 0.0-1.0,
  "reasoning": "Brief explanation pointing at the controlling passage"
}}
```
"#,
        proposition = claim.proposition,
        citation = claim.citation.raw,
        case_name = record.case_name.as_deref().unwrap_or("unknown"),
        source = source_excerpt(record),
    )
}

pub fn build_adversarial_prompt(claim: &Claim, record: &CaseRecord, first: &StageDecision) -> String {
    format!(
        r#"# Adversarial Holding Review

A first reviewer concluded with confidence {confidence:.2} that the authority
below supports the proposition. Their reasoning:

> {reasoning}

Try to break that conclusion. Look for a narrower holding, a different
procedural posture, a distinguishing fact, or language that is only dicta.
Approve only if the proposition survives.

## Proposition
{proposition}

## Citation
{citation}

## Authority: {case_name}
{source}

## Output

Respond with ONLY a JSON object in this exact format (no markdown, no explanation):

```json
{{
  "approve": true,
  "confidence": 0.0-1.0,
  "reasoning": "The strongest reason for your decision"
}}
```
"#,
        confidence = first.confidence,
        reasoning = first.reasoning,
        proposition = claim.proposition,
        citation = claim.citation.raw,
        case_name = record.case_name.as_deref().unwrap_or("unknown"),
        source = source_excerpt(record),
    )
}

pub fn parse_holding_response(value: &Value) -> Option<StageDecision> {
    let confidence = probability(value, "confidence")?;
    Some(StageDecision {
        approve: confidence >= REVIEW_THRESHOLD,
        confidence,
        reasoning: text_field(value, "reasoning"),
    })
}

pub fn parse_adversarial_response(value: &Value) -> Option<StageDecision> {
    let approve = value.get("approve")?.as_bool()?;
    Some(StageDecision {
        approve,
        confidence: probability(value, "confidence").unwrap_or(0.5),
        reasoning: text_field(value, "reasoning"),
    })
}

fn first_stage_schema() -> Value {
    json!({
        "type": "object",
        "required": ["confidence"],
        "properties": {
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"}
        }
    })
}

fn second_stage_schema() -> Value {
    json!({
        "type": "object",
        "required": ["approve", "confidence"],
        "properties": {
            "approve": {"type": "boolean"},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"}
        }
    })
}

fn unparseable(tier: ModelTier, what: &str) -> DependencyError {
    DependencyError::Failed {
        dependency: tier.dependency(),
        source: anyhow::anyhow!("unparseable {} answer", what),
    }
}

pub async fn verify_holding(
    models: &StepModels,
    claim: &Claim,
    record: &CaseRecord,
    high_stakes: bool,
) -> Result<HoldingOutcome, DependencyError> {
    let mut usage = Vec::new();

    let (value, spent) = models
        .ask(
            ModelTier::Fast,
            FIRST_STAGE_SYSTEM,
            build_holding_prompt(claim, record),
            first_stage_schema(),
            None,
        )
        .await?;
    usage.push(spent);
    let first = parse_holding_response(&value)
        .ok_or_else(|| unparseable(ModelTier::Fast, "holding"))?;

    let second = if needs_second_stage(first.confidence, high_stakes) {
        let (value, spent) = models
            .ask(
                ModelTier::Slow,
                SECOND_STAGE_SYSTEM,
                build_adversarial_prompt(claim, record, &first),
                second_stage_schema(),
                Some(ADVERSARIAL_THINKING_BUDGET),
            )
            .await?;
        usage.push(spent);
        Some(
            parse_adversarial_response(&value)
                .ok_or_else(|| unparseable(ModelTier::Slow, "adversarial"))?,
        )
    } else {
        None
    };

    let result = resolve(first.confidence, second.as_ref());
    debug!(
        citation = %claim.citation.raw,
        first = first.confidence,
        second_stage = second.is_some(),
        ?result,
        "Holding checked"
    );
    Ok(HoldingOutcome {
        result,
        score: holding_score(first.confidence, second.as_ref()),
        first_stage: first,
        second_stage: second,
        usage,
    })
}

/// Calendar year used for the aged-citation rule.
pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}
