//! Protocol evaluation over a verification pass.
//!
//! Three protocols look at the claims verified by one citation-check phase:
//! - failure ceiling: existence, holding and quote failures reaching the
//!   tier ceiling pause the pipeline
//! - dicta: any claim resting on dicta is flagged
//! - bad law: any overruled, superseded or reversed authority blocks
//!
//! The aggregated decision is the most severe one triggered.

use std::fmt;

use serde::Serialize;

use crate::citation::{ClaimVerification, FlagKind};
use crate::config::TierPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    FailureCeiling,
    DictaAsHolding,
    BadLaw,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailureCeiling => "failure_ceiling",
            Self::DictaAsHolding => "dicta_as_holding",
            Self::BadLaw => "bad_law",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered by severity: `Block > Pause > Flag > Continue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolDecision {
    Continue,
    Flag,
    Pause,
    Block,
}

impl ProtocolDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Flag => "flag",
            Self::Pause => "pause",
            Self::Block => "block",
        }
    }

    /// Pause and Block stop the pipeline at a checkpoint.
    pub fn halts(&self) -> bool {
        *self >= Self::Pause
    }
}

impl fmt::Display for ProtocolDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolResult {
    pub protocol: Protocol,
    pub decision: ProtocolDecision,
    pub count: usize,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolOutcome {
    /// Only the protocols that triggered.
    pub triggered: Vec<ProtocolResult>,
    pub decision: ProtocolDecision,
}

impl ProtocolOutcome {
    pub fn summary(&self) -> String {
        if self.triggered.is_empty() {
            return "no protocol triggered".to_string();
        }
        self.triggered
            .iter()
            .map(|r| format!("{} ({}): {}", r.protocol, r.decision, r.detail))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn count_flags(verifications: &[ClaimVerification], pred: impl Fn(FlagKind) -> bool) -> usize {
    verifications
        .iter()
        .flat_map(|v| v.flags.iter())
        .filter(|f| pred(f.kind))
        .count()
}

pub struct ProtocolOrchestrator;

impl ProtocolOrchestrator {
    pub fn evaluate(verifications: &[ClaimVerification], policy: &TierPolicy) -> ProtocolOutcome {
        let mut triggered = Vec::new();

        let failures = count_flags(verifications, |k| k.is_core_failure());
        if failures >= policy.failure_ceiling as usize {
            triggered.push(ProtocolResult {
                protocol: Protocol::FailureCeiling,
                decision: ProtocolDecision::Pause,
                count: failures,
                detail: format!(
                    "{} existence/holding/quote failures, ceiling {}",
                    failures, policy.failure_ceiling
                ),
            });
        }

        let dicta = count_flags(verifications, |k| k == FlagKind::DictaAsHolding);
        if dicta > 0 {
            triggered.push(ProtocolResult {
                protocol: Protocol::DictaAsHolding,
                decision: ProtocolDecision::Flag,
                count: dicta,
                detail: format!("{} claim(s) rest on dicta", dicta),
            });
        }

        let bad_law = count_flags(verifications, |k| k == FlagKind::BadLaw);
        if bad_law > 0 {
            triggered.push(ProtocolResult {
                protocol: Protocol::BadLaw,
                decision: ProtocolDecision::Block,
                count: bad_law,
                detail: format!("{} authority(ies) no longer good law", bad_law),
            });
        }

        let decision = triggered
            .iter()
            .map(|r| r.decision)
            .max()
            .unwrap_or(ProtocolDecision::Continue);
        ProtocolOutcome { triggered, decision }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::{Flag, StepScores, Verdict};
    use crate::config::DocketConfig;
    use docket_common::{CitationStatus, Tier};

    fn with_flags(kinds: &[FlagKind]) -> ClaimVerification {
        ClaimVerification {
            verdict: Verdict::Failed,
            status: CitationStatus::Failed,
            verified: false,
            source_id: None,
            scores: StepScores::default(),
            composite: 0.0,
            flags: kinds.iter().map(|&k| Flag::new(k, "test")).collect(),
            second_stage: false,
        }
    }

    fn policy(tier: Tier) -> TierPolicy {
        *DocketConfig::default().tier_policy(tier)
    }

    #[test]
    fn tier_c_pauses_at_seven_failures_not_six() {
        let six: Vec<_> = (0..6).map(|_| with_flags(&[FlagKind::NotFound])).collect();
        let outcome = ProtocolOrchestrator::evaluate(&six, &policy(Tier::C));
        assert_eq!(outcome.decision, ProtocolDecision::Continue);
        assert!(outcome.triggered.is_empty());

        let mut seven = six;
        seven.push(with_flags(&[FlagKind::QuoteFabrication]));
        let outcome = ProtocolOrchestrator::evaluate(&seven, &policy(Tier::C));
        assert_eq!(outcome.decision, ProtocolDecision::Pause);
        assert_eq!(outcome.triggered[0].count, 7);
    }

    #[test]
    fn block_outranks_pause_and_flag() {
        let claims = vec![
            with_flags(&[FlagKind::NotFound, FlagKind::HoldingMismatch, FlagKind::QuoteFabrication]),
            with_flags(&[FlagKind::DictaAsHolding]),
            with_flags(&[FlagKind::BadLaw]),
        ];
        let outcome = ProtocolOrchestrator::evaluate(&claims, &policy(Tier::A));
        assert_eq!(outcome.triggered.len(), 3);
        assert_eq!(outcome.decision, ProtocolDecision::Block);
        assert!(outcome.decision.halts());
        assert!(outcome.summary().contains("bad_law"));
    }

    #[test]
    fn dicta_alone_only_flags() {
        let outcome = ProtocolOrchestrator::evaluate(
            &[with_flags(&[FlagKind::DictaAsHolding])],
            &policy(Tier::D),
        );
        assert_eq!(outcome.decision, ProtocolDecision::Flag);
        assert!(!outcome.decision.halts());
    }

    #[test]
    fn non_core_failures_do_not_count_toward_ceiling() {
        let claims: Vec<_> = (0..10)
            .map(|_| with_flags(&[FlagKind::LowComposite, FlagKind::WeakAuthority]))
            .collect();
        let outcome = ProtocolOrchestrator::evaluate(&claims, &policy(Tier::A));
        assert_eq!(outcome.decision, ProtocolDecision::Continue);
    }
}
