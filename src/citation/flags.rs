//! Step 7: compile step results into a verdict.

use docket_common::{CitationStatus, FlagSeverity, PhaseCode};

use super::confidence::composite;
use super::types::{ClaimVerification, Flag, FlagKind, StepScores, Verdict};

/// What the first six steps produced for one claim.
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub source_id: Option<String>,
    pub scores: StepScores,
    pub flags: Vec<Flag>,
    pub second_stage: bool,
    /// Steps skipped because their dependency could not answer.
    pub unavailable: Vec<String>,
}

impl StepReport {
    pub fn flag(&mut self, kind: FlagKind, detail: impl Into<String>) {
        self.flags.push(Flag::new(kind, detail));
    }

    pub fn unavailable(&mut self, step: &str, error: impl std::fmt::Display) {
        self.flag(FlagKind::LookupUnavailable, format!("{}: {}", step, error));
        self.unavailable.push(step.to_string());
    }

    fn has(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }
}

/// Research-phase claims land in the citation bank; the rest are draft
/// citations.
fn verified_status(origin: PhaseCode) -> CitationStatus {
    if origin == PhaseCode::AuthorityResearch {
        CitationStatus::BankVerified
    } else {
        CitationStatus::DraftVerified
    }
}

/// Order of precedence: not found, then unavailable dependencies, then the
/// worst flag and the tier's composite minimum.
pub fn compile(mut report: StepReport, origin: PhaseCode, min_composite: f64) -> ClaimVerification {
    let composite = composite(&report.scores);

    let (verdict, status) = if report.has(FlagKind::NotFound) {
        (Verdict::Failed, CitationStatus::Unmatched)
    } else if !report.unavailable.is_empty() {
        (Verdict::Deferred, CitationStatus::VerificationDeferred)
    } else {
        if composite < min_composite {
            report.flag(
                FlagKind::LowComposite,
                format!("composite {:.2} below {:.2}", composite, min_composite),
            );
        }
        match report.flags.iter().map(Flag::severity).min() {
            Some(FlagSeverity::Block) => (Verdict::Failed, CitationStatus::Failed),
            Some(FlagSeverity::Flag) => (Verdict::NeedsReview, CitationStatus::Failed),
            Some(FlagSeverity::Note) => (Verdict::VerifiedWithNotes, verified_status(origin)),
            None => (Verdict::Verified, verified_status(origin)),
        }
    };

    ClaimVerification {
        verdict,
        status,
        verified: verdict.is_verified(),
        source_id: report.source_id,
        scores: report.scores,
        composite,
        flags: report.flags,
        second_stage: report.second_stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean() -> StepReport {
        StepReport {
            source_id: Some("cl-1".into()),
            scores: StepScores {
                existence: Some(1.0),
                holding: Some(0.97),
                dicta_risk: Some(0.1),
                quote: None,
                bad_law: Some(1.0),
                authority: Some(1.0),
            },
            ..Default::default()
        }
    }

    #[test]
    fn clean_research_claim_is_bank_verified() {
        let result = compile(clean(), PhaseCode::AuthorityResearch, 0.8);
        assert_eq!(result.verdict, Verdict::Verified);
        assert_eq!(result.status, CitationStatus::BankVerified);
        assert!(result.verified);
    }

    #[test]
    fn partial_holding_match_verifies_with_notes() {
        let mut report = clean();
        report.scores.holding = Some(0.92);
        report.second_stage = true;
        report.flag(FlagKind::HoldingPartialMatch, "second stage approved");
        let result = compile(report, PhaseCode::Drafting, 0.8);
        assert_eq!(result.verdict, Verdict::VerifiedWithNotes);
        assert_eq!(result.status, CitationStatus::DraftVerified);
        assert!(result.verified);
        assert!(result.second_stage);
    }

    #[test]
    fn low_composite_fails_even_without_flags() {
        let mut report = clean();
        report.scores.holding = Some(0.5);
        report.scores.bad_law = Some(0.5);
        let result = compile(report, PhaseCode::Drafting, 0.85);
        assert_eq!(result.verdict, Verdict::Failed);
        assert!(result.flags.iter().any(|f| f.kind == FlagKind::LowComposite));
    }

    #[test]
    fn unavailable_dependency_defers() {
        let mut report = clean();
        report.unavailable("holding", "circuit open");
        let result = compile(report, PhaseCode::Drafting, 0.8);
        assert_eq!(result.verdict, Verdict::Deferred);
        assert_eq!(result.status, CitationStatus::VerificationDeferred);
        assert!(!result.verified);
    }

    #[test]
    fn not_found_is_unmatched() {
        let report = StepReport {
            scores: StepScores {
                existence: Some(0.0),
                ..Default::default()
            },
            flags: vec![Flag::new(FlagKind::NotFound, "no match")],
            ..Default::default()
        };
        let result = compile(report, PhaseCode::Drafting, 0.7);
        assert_eq!(result.verdict, Verdict::Failed);
        assert_eq!(result.status, CitationStatus::Unmatched);
        assert_eq!(result.composite, 0.0);
    }

    #[test]
    fn flag_severity_needs_review() {
        let mut report = clean();
        report.flag(FlagKind::DictaAsHolding, "risk 0.8");
        let result = compile(report, PhaseCode::Drafting, 0.7);
        assert_eq!(result.verdict, Verdict::NeedsReview);
        assert!(!result.verified);
    }
}
