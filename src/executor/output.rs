//! Reading phase answers: JSON when the model gave it, raw text otherwise.

use docket_common::PhaseCode;
use serde::Serialize;
use serde_json::{Value, json};

use crate::citation::extract::clean_text;
use crate::citation::{Citation, Claim, extract_citations};
use crate::gateway::extract_json;

/// Parsed answer of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutput {
    /// The JSON object, or `{"raw": text}` when none could be parsed.
    pub value: Value,
    pub structured: bool,
}

/// Judge simulation result on a 4.0 scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grade {
    pub letter: Option<String>,
    pub score: f64,
}

impl Grade {
    pub fn from_value(value: &Value) -> Option<Self> {
        let letter = value
            .get("grade")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty());
        let score = value
            .get("score")
            .and_then(Value::as_f64)
            .or_else(|| letter.as_deref().and_then(letter_points))?;
        Some(Self {
            letter,
            score: score.clamp(0.0, 4.0),
        })
    }

    pub fn passes(&self, threshold: f64) -> bool {
        self.score >= threshold
    }

    /// `B+ (3.3)`, or just the score.
    pub fn label(&self) -> String {
        match &self.letter {
            Some(letter) => format!("{} ({:.1})", letter, self.score),
            None => format!("{:.1}", self.score),
        }
    }
}

fn letter_points(letter: &str) -> Option<f64> {
    let points = match letter {
        "A+" | "A" => 4.0,
        "A-" => 3.7,
        "B+" => 3.3,
        "B" => 3.0,
        "B-" => 2.7,
        "C+" => 2.3,
        "C" => 2.0,
        "C-" => 1.7,
        "D+" => 1.3,
        "D" => 1.0,
        "D-" => 0.7,
        "F" => 0.0,
        _ => return None,
    };
    Some(points)
}

impl PhaseOutput {
    pub fn parse(text: &str) -> Self {
        match extract_json(text) {
            Some(value) if value.is_object() => Self {
                value,
                structured: true,
            },
            _ => Self {
                value: json!({ "raw": text }),
                structured: false,
            },
        }
    }

    pub fn raw_text(&self) -> Option<&str> {
        self.value.get("raw").and_then(Value::as_str)
    }

    /// Explicit `next_phase`, when it names a real phase.
    pub fn recommendation(&self) -> Option<PhaseCode> {
        self.value
            .get("next_phase")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// The hold reason when the phase asked for a HOLD.
    pub fn hold_request(&self) -> Option<String> {
        let required = self
            .value
            .get("hold_required")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !required {
            return None;
        }
        let reason = self
            .value
            .get("hold_reason")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Additional information is needed from the customer");
        Some(reason.to_string())
    }

    pub fn grade(&self) -> Option<Grade> {
        Grade::from_value(&self.value)
    }

    /// Document body: the first of `document`, `draft`, `revised_draft`,
    /// or the raw text.
    pub fn document_text(&self) -> Option<&str> {
        ["document", "draft", "revised_draft"]
            .iter()
            .find_map(|key| self.value.get(*key).and_then(Value::as_str))
            .or_else(|| self.raw_text())
            .filter(|s| !s.trim().is_empty())
    }

    /// Claims the phase cites. A structured `citations` (or `claims`) list
    /// wins; otherwise citations are pulled out of the document text.
    pub fn claims(&self) -> Vec<Claim> {
        let listed = self
            .value
            .get("citations")
            .or_else(|| self.value.get("claims"))
            .and_then(Value::as_array);
        if let Some(items) = listed {
            let claims: Vec<Claim> = items.iter().filter_map(claim_from_item).collect();
            if !claims.is_empty() {
                return claims;
            }
        }
        self.document_text()
            .map(claims_from_text)
            .unwrap_or_default()
    }
}

fn claim_from_item(item: &Value) -> Option<Claim> {
    let citation = match item.get("citation")? {
        Value::String(raw) => parse_citation(raw),
        other => serde_json::from_value::<Citation>(other.clone()).ok()?,
    };
    if citation.raw.trim().is_empty() {
        return None;
    }
    let proposition = item
        .get("proposition")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| citation.raw.clone());
    let quoted_text = item
        .get("quoted_text")
        .or_else(|| item.get("quote"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);
    let flag = |key: &str| item.get(key).and_then(Value::as_bool).unwrap_or(false);
    Some(Claim {
        proposition,
        citation,
        quoted_text,
        sole_authority: flag("sole_authority"),
        dispositive_element: flag("dispositive_element"),
    })
}

/// First citation parsed out of `raw`, keeping `raw` as written.
fn parse_citation(raw: &str) -> Citation {
    let raw = raw.trim();
    match extract_citations(raw).into_iter().next() {
        Some(found) => Citation {
            raw: raw.to_string(),
            ..found.citation
        },
        None => Citation {
            raw: raw.to_string(),
            ..Default::default()
        },
    }
}

const MAX_PROPOSITION_CHARS: usize = 400;

/// One claim per citation found in free text. The proposition is the text
/// between the previous citation and this one.
pub fn claims_from_text(text: &str) -> Vec<Claim> {
    let cleaned = clean_text(text);
    let mut previous_end = 0;
    let mut claims = Vec::new();
    for found in extract_citations(text) {
        let (start, end) = found.span;
        let lead = cleaned.get(previous_end.min(start)..start).unwrap_or("");
        previous_end = end;
        let proposition = proposition_from(lead).unwrap_or_else(|| found.citation.raw.clone());
        claims.push(Claim {
            proposition,
            citation: found.citation,
            ..Default::default()
        });
    }
    claims
}

fn proposition_from(lead: &str) -> Option<String> {
    let trimmed = lead
        .trim()
        .trim_start_matches(|c: char| c == '.' || c == ';' || c == ',' || c == ')' || c.is_whitespace())
        .trim_end_matches(|c: char| c == ';' || c == ',' || c.is_whitespace());
    let trimmed = ["See also", "See", "But see", "Cf.", "Accord", "E.g.,"]
        .iter()
        .find_map(|signal| trimmed.strip_suffix(signal))
        .unwrap_or(trimmed)
        .trim_end();
    if trimmed.is_empty() {
        return None;
    }
    let chars: Vec<char> = trimmed.chars().collect();
    let tail: String = if chars.len() > MAX_PROPOSITION_CHARS {
        chars[chars.len() - MAX_PROPOSITION_CHARS..].iter().collect()
    } else {
        trimmed.to_string()
    };
    Some(tail.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_answer_is_kept_raw() {
        let out = PhaseOutput::parse("I could not complete this phase.");
        assert!(!out.structured);
        assert_eq!(out.raw_text(), Some("I could not complete this phase."));
        assert_eq!(out.recommendation(), None);
    }

    #[test]
    fn fenced_json_is_structured() {
        let out = PhaseOutput::parse("Here you go:\n```json\n{\"summary\": \"ok\", \"next_phase\": \"VI\"}\n```");
        assert!(out.structured);
        assert_eq!(out.recommendation(), Some(PhaseCode::OppositionAnticipation));
    }

    #[test]
    fn hold_request_needs_the_flag() {
        let out = PhaseOutput::parse(r#"{"hold_required": true, "hold_reason": "Need the lease"}"#);
        assert_eq!(out.hold_request().as_deref(), Some("Need the lease"));
        let none = PhaseOutput::parse(r#"{"hold_required": false, "hold_reason": "x"}"#);
        assert_eq!(none.hold_request(), None);
    }

    #[test]
    fn grade_falls_back_to_letter() {
        let out = PhaseOutput::parse(r#"{"grade": "b-"}"#);
        let grade = out.grade().unwrap();
        assert_eq!(grade.score, 2.7);
        assert_eq!(grade.label(), "B- (2.7)");
        assert!(!grade.passes(3.3));

        let scored = PhaseOutput::parse(r#"{"grade": "A", "score": 3.8}"#).grade().unwrap();
        assert!(scored.passes(3.7));
        assert!(PhaseOutput::parse(r#"{"summary": "x"}"#).grade().is_none());
    }

    #[test]
    fn structured_citations_become_claims() {
        let out = PhaseOutput::parse(
            r#"{"citations": [
                {"proposition": "Summary judgment is proper absent a triable issue.",
                 "citation": "Aguilar v. Atlantic Richfield Co., 25 Cal.4th 826, 843 (2001)",
                 "quoted_text": "no triable issue", "dispositive_element": true},
                {"proposition": "missing citation"}
            ]}"#,
        );
        let claims = out.claims();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].citation.volume, Some(25));
        assert_eq!(claims[0].quoted_text.as_deref(), Some("no triable issue"));
        assert!(claims[0].dispositive_element);
        assert!(!claims[0].sole_authority);
    }

    #[test]
    fn draft_text_citations_are_extracted_when_none_listed() {
        let out = PhaseOutput::parse(
            r#"{"draft": "Summary judgment is proper where no triable issue exists. Aguilar v. Atlantic Richfield Co., 25 Cal.4th 826, 843 (2001).", "citations": []}"#,
        );
        let claims = out.claims();
        assert_eq!(claims.len(), 1);
        assert_eq!(
            claims[0].proposition,
            "Summary judgment is proper where no triable issue exists."
        );
    }
}
