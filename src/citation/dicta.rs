//! Step 3: is the cited language holding or dicta?

use serde_json::{Value, json};

use super::existence::CaseRecord;
use super::judge::{StepModels, probability, text_field};
use super::types::Claim;
use crate::errors::DependencyError;
use crate::gateway::{ModelTier, TokenUsage};

/// Risk at or above this flags the claim as relying on dicta.
pub const DICTA_FLAG_THRESHOLD: f64 = 0.7;

const SYSTEM: &str = "You distinguish the holding of a judicial opinion from its dicta.";

#[derive(Debug, Clone, PartialEq)]
pub struct DictaAssessment {
    pub risk: f64,
    pub reasoning: String,
}

impl DictaAssessment {
    pub fn is_dicta(&self) -> bool {
        self.risk >= DICTA_FLAG_THRESHOLD
    }
}

pub fn build_dicta_prompt(claim: &Claim, record: &CaseRecord) -> String {
    format!(
        r#"# Dicta Check

The proposition below is cited to {case_name}. Estimate the probability that
the supporting language is dicta rather than part of the court's holding
(necessary to the judgment).

## Proposition
{proposition}

## Quoted language
{quote}

## Opinion
{source}

## Output

Respond with ONLY a JSON object in this exact format (no markdown, no explanation):

```json
{{
  "dicta_risk": 0.0-1.0,
  "reasoning": "Why the language is or is not necessary to the judgment"
}}
```
"#,
        case_name = record.case_name.as_deref().unwrap_or(&claim.citation.raw),
        proposition = claim.proposition,
        quote = claim.quoted_text.as_deref().unwrap_or("(none)"),
        source = record.text.as_deref().unwrap_or("(no opinion text available)"),
    )
}

pub fn parse_dicta_response(value: &Value) -> Option<DictaAssessment> {
    Some(DictaAssessment {
        risk: probability(value, "dicta_risk")?,
        reasoning: text_field(value, "reasoning"),
    })
}

pub async fn assess_dicta(
    models: &StepModels,
    claim: &Claim,
    record: &CaseRecord,
) -> Result<(DictaAssessment, TokenUsage), DependencyError> {
    let schema = json!({
        "type": "object",
        "required": ["dicta_risk"],
        "properties": {
            "dicta_risk": {"type": "number"},
            "reasoning": {"type": "string"}
        }
    });
    let (value, usage) = models
        .ask(ModelTier::Fast, SYSTEM, build_dicta_prompt(claim, record), schema, None)
        .await?;
    let assessment = parse_dicta_response(&value).ok_or_else(|| DependencyError::Failed {
        dependency: ModelTier::Fast.dependency(),
        source: anyhow::anyhow!("unparseable dicta answer"),
    })?;
    Ok((assessment, usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        let at = parse_dicta_response(&json!({"dicta_risk": 0.7})).unwrap();
        assert!(at.is_dicta());
        let below = parse_dicta_response(&json!({"dicta_risk": 0.69})).unwrap();
        assert!(!below.is_dicta());
    }

    #[test]
    fn missing_risk_is_unparseable() {
        assert!(parse_dicta_response(&json!({"reasoning": "holding"})).is_none());
    }

    #[test]
    fn prompt_carries_quote_and_case_name() {
        let claim = Claim {
            proposition: "Movant bears the initial burden".into(),
            quoted_text: Some("the moving party bears the initial responsibility".into()),
            ..Default::default()
        };
        let record = CaseRecord {
            case_name: Some("Celotex Corp. v. Catrett".into()),
            ..Default::default()
        };
        let prompt = build_dicta_prompt(&claim, &record);
        assert!(prompt.contains("Celotex Corp. v. Catrett"));
        assert!(prompt.contains("initial responsibility"));
    }
}
