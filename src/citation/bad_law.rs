//! Step 5: is the authority still good law?
//!
//! The model reads the opinion and the lookup's treatment signal; the
//! worse of the two wins.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::existence::{CaseRecord, Treatment};
use super::judge::{StepModels, text_field};
use super::types::Claim;
use crate::errors::DependencyError;
use crate::gateway::{ModelTier, TokenUsage};

const SYSTEM: &str = "You track subsequent history and treatment of judicial opinions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawStatus {
    // Ordered best to worst.
    Good,
    Questioned,
    Superseded,
    Reversed,
    Overruled,
}

impl LawStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Questioned => "questioned",
            Self::Superseded => "superseded",
            Self::Reversed => "reversed",
            Self::Overruled => "overruled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "good" | "good_law" | "positive" => Some(Self::Good),
            "questioned" | "criticized" | "distinguished" | "limited" => Some(Self::Questioned),
            "superseded" => Some(Self::Superseded),
            "reversed" => Some(Self::Reversed),
            "overruled" => Some(Self::Overruled),
            _ => None,
        }
    }

    /// Overruled, superseded or reversed.
    pub fn is_bad_law(&self) -> bool {
        *self >= Self::Superseded
    }

    pub fn score(&self) -> f64 {
        match self {
            Self::Good => 1.0,
            Self::Questioned => 0.5,
            _ => 0.0,
        }
    }

    fn from_treatment(treatment: Treatment) -> Self {
        match treatment {
            Treatment::Unknown | Treatment::Positive => Self::Good,
            Treatment::Questioned => Self::Questioned,
            Treatment::Negative => Self::Overruled,
        }
    }
}

impl fmt::Display for LawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadLawAssessment {
    pub status: LawStatus,
    pub reasoning: String,
}

/// Worst of the model's finding and the lookup's treatment.
pub fn combine(model: LawStatus, treatment: Treatment) -> LawStatus {
    model.max(LawStatus::from_treatment(treatment))
}

pub fn build_bad_law_prompt(claim: &Claim, record: &CaseRecord) -> String {
    format!(
        r#"# Subsequent History Check

Determine whether {case_name} ({citation}) remains good law for the
proposition below. Report the most severe treatment you find.

## Proposition
{proposition}

## Known treatment
{treatment:?}

## Opinion
{source}

## Output

Respond with ONLY a JSON object in this exact format (no markdown, no explanation):

```json
{{
  "status": "good|questioned|superseded|reversed|overruled",
  "reasoning": "The later authority and how it treats this one"
}}
```
"#,
        case_name = record.case_name.as_deref().unwrap_or("the cited authority"),
        citation = claim.citation.reporter_cite(),
        proposition = claim.proposition,
        treatment = record.treatment,
        source = record.text.as_deref().unwrap_or("(no opinion text available)"),
    )
}

pub fn parse_bad_law_response(value: &Value) -> Option<BadLawAssessment> {
    let status = LawStatus::parse(value.get("status")?.as_str()?)?;
    Some(BadLawAssessment {
        status,
        reasoning: text_field(value, "reasoning"),
    })
}

pub async fn check_bad_law(
    models: &StepModels,
    claim: &Claim,
    record: &CaseRecord,
) -> Result<(BadLawAssessment, TokenUsage), DependencyError> {
    let schema = json!({
        "type": "object",
        "required": ["status"],
        "properties": {
            "status": {"enum": ["good", "questioned", "superseded", "reversed", "overruled"]},
            "reasoning": {"type": "string"}
        }
    });
    let (value, usage) = models
        .ask(ModelTier::Fast, SYSTEM, build_bad_law_prompt(claim, record), schema, None)
        .await?;
    let mut assessment = parse_bad_law_response(&value).ok_or_else(|| DependencyError::Failed {
        dependency: ModelTier::Fast.dependency(),
        source: anyhow::anyhow!("unparseable bad-law answer"),
    })?;
    assessment.status = combine(assessment.status, record.treatment);
    Ok((assessment, usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn treatment_can_only_worsen_the_model_finding() {
        assert_eq!(combine(LawStatus::Good, Treatment::Negative), LawStatus::Overruled);
        assert_eq!(combine(LawStatus::Reversed, Treatment::Positive), LawStatus::Reversed);
        assert_eq!(combine(LawStatus::Good, Treatment::Questioned), LawStatus::Questioned);
        assert_eq!(combine(LawStatus::Good, Treatment::Unknown), LawStatus::Good);
    }

    #[test]
    fn overruled_superseded_reversed_are_bad_law() {
        for status in [LawStatus::Overruled, LawStatus::Superseded, LawStatus::Reversed] {
            assert!(status.is_bad_law());
            assert_eq!(status.score(), 0.0);
        }
        assert!(!LawStatus::Questioned.is_bad_law());
    }

    #[test]
    fn parses_synonyms_case_insensitively() {
        let parsed = parse_bad_law_response(&json!({"status": "Criticized"})).unwrap();
        assert_eq!(parsed.status, LawStatus::Questioned);
        assert!(parse_bad_law_response(&json!({"status": "vacated?"})).is_none());
    }
}
