//! Phase prompts: order context, every earlier phase output, answers to
//! resolved checkpoints, and the phase's own task and answer format.

use docket_common::{CheckpointState, CheckpointType, Order, PhaseCode, PhaseStatus};
use serde_json::{Value, json};

use crate::store::{Checkpoint, Disclosure, PhaseExecution};

pub const SYSTEM_PROMPT: &str = "You are a senior litigation associate working one stage of a \
motion-drafting pipeline. Work only from the order details and earlier stage outputs you are \
given. Never invent authorities. Answer with a single JSON object.";

/// What goes to the model for one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseInput {
    pub system: &'static str,
    pub prompt: String,
    pub schema: Value,
}

pub fn build_phase_input(
    order: &Order,
    phase: PhaseCode,
    loop_number: u32,
    prior: &[PhaseExecution],
    checkpoints: &[Checkpoint],
    disclosures: &[Disclosure],
) -> PhaseInput {
    PhaseInput {
        system: SYSTEM_PROMPT,
        prompt: build_phase_prompt(order, phase, loop_number, prior, checkpoints, disclosures),
        schema: output_schema(phase),
    }
}

pub fn build_phase_prompt(
    order: &Order,
    phase: PhaseCode,
    loop_number: u32,
    prior: &[PhaseExecution],
    checkpoints: &[Checkpoint],
    disclosures: &[Disclosure],
) -> String {
    let revision_note = if loop_number > 0 {
        format!("\nThis is revision loop {}.\n", loop_number)
    } else {
        String::new()
    };
    let disclosure_section = if phase == PhaseCode::FinalAssembly && !disclosures.is_empty() {
        let items: Vec<String> = disclosures.iter().map(|d| format!("- {}", d.text)).collect();
        format!(
            "\n## Required disclosures\n\nInclude each of these verbatim at the end of the document:\n\n{}\n",
            items.join("\n")
        )
    } else {
        String::new()
    };

    format!(
        r#"# Phase {code}: {name}
{revision_note}
## Order

- Caption: {caption}
- Motion: {motion}
- Jurisdiction: {jurisdiction}
- Service tier: {tier}
- Filing deadline: {deadline}

### Statement of facts
{facts}

## Earlier phases

{history}
{answers}
## Task

{task}
{disclosure_section}
## Output

Respond with ONLY a JSON object in this exact format (no markdown, no explanation):

```json
{format}
```
"#,
        code = phase,
        name = phase.name(),
        caption = order.case_caption,
        motion = order.motion_type,
        jurisdiction = order.jurisdiction.to_ascii_uppercase(),
        tier = order.tier,
        deadline = order
            .filing_deadline
            .map(|d| d.to_string())
            .unwrap_or_else(|| "not set".to_string()),
        facts = order.statement_of_facts,
        history = render_history(prior),
        answers = render_answers(phase, checkpoints),
        task = task(phase),
        format = output_format(phase),
    )
}

/// Every completed execution, oldest first. Unstructured answers are
/// shown as the raw text they were stored as.
fn render_history(prior: &[PhaseExecution]) -> String {
    let sections: Vec<String> = prior
        .iter()
        .filter(|e| e.status == PhaseStatus::Completed)
        .map(|e| {
            let body = match e.output.get("raw").and_then(Value::as_str) {
                Some(raw) => raw.to_string(),
                None => format!(
                    "```json\n{}\n```",
                    serde_json::to_string_pretty(&e.output).unwrap_or_default()
                ),
            };
            format!(
                "### {} {} (attempt {}, loop {})\n\n{}",
                e.phase,
                e.phase.name(),
                e.attempt,
                e.loop_number,
                body
            )
        })
        .collect();
    if sections.is_empty() {
        "(none yet)".to_string()
    } else {
        sections.join("\n\n")
    }
}

/// Resolved checkpoints that carry an answer, oldest first. An answered
/// HOLD on the phase being run adds an instruction.
fn render_answers(phase: PhaseCode, checkpoints: &[Checkpoint]) -> String {
    let answered: Vec<&Checkpoint> = checkpoints
        .iter()
        .filter(|c| c.state == CheckpointState::Resolved)
        .filter(|c| c.resolution.as_deref().is_some_and(|r| !r.trim().is_empty()))
        .collect();
    if answered.is_empty() {
        return String::new();
    }

    let items: Vec<String> = answered
        .iter()
        .map(|c| {
            format!(
                "- {} raised at phase {} ({}). Answered by {}: {}",
                c.kind,
                c.phase,
                c.reason,
                c.resolved_by.as_deref().unwrap_or("unknown"),
                c.resolution.as_deref().unwrap_or_default().trim()
            )
        })
        .collect();
    let hold_note = if answered
        .iter()
        .any(|c| c.kind == CheckpointType::Hold && c.phase == phase)
    {
        "\nThis phase was put on hold earlier and the hold has been answered. Treat the answer as \
         supplied evidence. Set hold_required only for a gap the answer leaves open.\n"
    } else {
        ""
    };
    format!(
        "\n## Answered checkpoints\n\n{}\n{}",
        items.join("\n"),
        hold_note
    )
}

fn task(phase: PhaseCode) -> &'static str {
    use PhaseCode::*;
    match phase {
        Intake => "Review the order for completeness. List the issues the motion must address and anything missing from the facts.",
        LegalStandards => "State the governing legal standards and the elements the moving party must establish, with the controlling authorities.",
        EvidenceStrategy => "Map each element to the available evidence. If the motion cannot proceed without evidence the customer has not supplied, set hold_required and explain what is missing.",
        AuthorityResearch => "Research supporting authority for each element. Every citation you list must be real and must support the stated proposition.",
        Drafting => "Draft the memorandum of points and authorities. Cite only authorities from the research phase; list every proposition you cite.",
        CitationCheck | PostRevisionCitationCheck => "Summarize the citation verification results for the current draft.",
        OppositionAnticipation => "Anticipate the strongest opposition arguments and how the draft answers each one.",
        JudgeSimulation => "Review the current draft as the assigned judge would. Grade it on a 4.0 scale and list the weaknesses that must be fixed.",
        Revisions => "Revise the latest draft to fix every weakness from the most recent judge simulation and any failed citations. Return the full revised draft.",
        CaptionValidation => "Check the caption, court name, department and hearing information against the order and local rules.",
        SupportingDocuments => "Prepare the notice of motion, declarations and proposed order that accompany the memorandum.",
        SeparateStatementCheck => "Check that the separate statement of undisputed facts matches the memorandum fact by fact.",
        FinalAssembly => "Assemble the final filing package from the latest draft and supporting documents.",
    }
}

fn output_format(phase: PhaseCode) -> &'static str {
    use PhaseCode::*;
    match phase {
        EvidenceStrategy => {
            r#"{
  "element_map": [{"element": "...", "evidence": ["..."]}],
  "hold_required": false,
  "hold_reason": "What the customer must supply, when hold_required is true"
}"#
        }
        AuthorityResearch => {
            r#"{
  "summary": "...",
  "citations": [
    {
      "proposition": "The rule this authority supports",
      "citation": "Aguilar v. Atlantic Richfield Co., 25 Cal.4th 826, 843 (2001)",
      "quoted_text": "Exact quoted language, or null",
      "sole_authority": false,
      "dispositive_element": true
    }
  ]
}"#
        }
        Drafting | Revisions => {
            r#"{
  "draft": "Full text of the memorandum",
  "citations": [
    {
      "proposition": "...",
      "citation": "...",
      "quoted_text": null,
      "sole_authority": false,
      "dispositive_element": false
    }
  ]
}"#
        }
        JudgeSimulation => {
            r#"{
  "grade": "B+",
  "score": 3.3,
  "weaknesses": ["..."],
  "strengths": ["..."]
}"#
        }
        FinalAssembly => {
            r#"{
  "document": "The complete filing package"
}"#
        }
        _ => {
            r#"{
  "summary": "...",
  "findings": ["..."],
  "next_phase": null
}"#
        }
    }
}

/// Minimal schema hint for the gateway; parsing never depends on it.
pub fn output_schema(phase: PhaseCode) -> Value {
    use PhaseCode::*;
    let required: &[&str] = match phase {
        EvidenceStrategy => &["element_map", "hold_required"],
        AuthorityResearch => &["citations"],
        Drafting | Revisions => &["draft", "citations"],
        JudgeSimulation => &["grade", "score"],
        FinalAssembly => &["document"],
        _ => &["summary"],
    };
    json!({ "type": "object", "required": required })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docket_common::{MotionType, OrderStatus, Tier};

    fn order() -> Order {
        Order {
            id: 3,
            tier: Tier::B,
            motion_type: MotionType::Compel,
            jurisdiction: "ca".into(),
            filing_deadline: None,
            status: OrderStatus::InProgress,
            customer_email: None,
            amount_paid_cents: 90_000,
            case_caption: "Rivera v. Northgate Storage".into(),
            statement_of_facts: "Defendant has not answered interrogatories.".into(),
        }
    }

    fn execution(id: i64, phase: PhaseCode, status: PhaseStatus, output: Value) -> PhaseExecution {
        PhaseExecution {
            id,
            order_id: 3,
            phase,
            attempt: 1,
            loop_number: 0,
            status,
            model: None,
            model_tier: None,
            thinking_budget: None,
            input_tokens: 0,
            output_tokens: 0,
            output,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_carries_every_completed_prior_output() {
        let prior = vec![
            execution(1, PhaseCode::Intake, PhaseStatus::Completed, json!({"summary": "issues: meet and confer"})),
            execution(2, PhaseCode::LegalStandards, PhaseStatus::Failed, json!({"summary": "should not appear"})),
            execution(3, PhaseCode::LegalStandards, PhaseStatus::Completed, json!({"raw": "CCP 2030.300 governs."})),
        ];
        let prompt = build_phase_prompt(&order(), PhaseCode::EvidenceStrategy, 0, &prior, &[], &[]);
        assert!(prompt.starts_with("# Phase III: Evidence strategy"));
        assert!(prompt.contains("meet and confer"));
        assert!(prompt.contains("CCP 2030.300 governs."));
        assert!(!prompt.contains("should not appear"));
        assert!(prompt.contains("\"hold_required\""));
        assert!(prompt.contains("Jurisdiction: CA"));
    }

    #[test]
    fn final_assembly_lists_disclosures() {
        let disclosure = Disclosure {
            id: 1,
            order_id: 3,
            kind: crate::store::DisclosureKind::RevisionLimit,
            text: "Three revision cycles ran.".into(),
            created_at: Utc::now(),
        };
        let prompt = build_phase_prompt(&order(), PhaseCode::FinalAssembly, 3, &[], &[], &[disclosure]);
        assert!(prompt.contains("This is revision loop 3."));
        assert!(prompt.contains("- Three revision cycles ran."));
        assert!(prompt.contains("(none yet)"));
    }

    fn checkpoint(kind: CheckpointType, state: CheckpointState, resolution: Option<&str>) -> Checkpoint {
        Checkpoint {
            id: 9,
            order_id: 3,
            kind,
            phase: PhaseCode::EvidenceStrategy,
            resume_phase: Some(PhaseCode::EvidenceStrategy),
            reason: "Need the meet-and-confer letters".into(),
            state,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: Some("client".into()),
            resolution: resolution.map(str::to_string),
            timeout_schedule: Vec::new(),
            auto_actioned: false,
        }
    }

    #[test]
    fn answered_hold_reaches_the_phase_that_raised_it() {
        let answered = checkpoint(
            CheckpointType::Hold,
            CheckpointState::Resolved,
            Some("Letters dated March 3 and March 17 attached"),
        );
        let prompt = build_phase_prompt(&order(), PhaseCode::EvidenceStrategy, 0, &[], &[answered], &[]);
        assert!(prompt.contains("## Answered checkpoints"));
        assert!(prompt.contains("Answered by client: Letters dated March 3 and March 17 attached"));
        assert!(prompt.contains("the hold has been answered"));
    }

    #[test]
    fn unanswered_checkpoints_are_left_out() {
        let pending = checkpoint(CheckpointType::Hold, CheckpointState::Pending, None);
        let blank = checkpoint(CheckpointType::Cp1, CheckpointState::Resolved, Some("  "));
        let prompt = build_phase_prompt(&order(), PhaseCode::EvidenceStrategy, 0, &[], &[pending, blank], &[]);
        assert!(!prompt.contains("Answered checkpoints"));
    }
}
