//! Claim, citation and verification result types.

use std::fmt;
use std::str::FromStr;

use docket_common::{CitationStatus, FlagSeverity, PhaseCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationKind {
    #[default]
    FullCase,
    ShortCase,
    Id,
    Supra,
    Statute,
}

/// A parsed legal citation. Short forms carry the fields of the
/// antecedent they were resolved to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub raw: String,
    #[serde(default)]
    pub kind: CitationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintiff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defendant: Option<String>,
    /// Code and section for statutes, e.g. `Cal. Civ. Proc. Code § 437c`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Citation {
    pub fn case_name(&self) -> Option<String> {
        match (&self.plaintiff, &self.defendant) {
            (Some(p), Some(d)) => Some(format!("{} v. {}", p, d)),
            (Some(p), None) => Some(p.clone()),
            (None, Some(d)) => Some(d.clone()),
            (None, None) => None,
        }
    }

    /// `volume reporter page` when known, otherwise the raw text.
    pub fn reporter_cite(&self) -> String {
        match (self.volume, &self.reporter, self.page) {
            (Some(v), Some(r), Some(p)) => format!("{} {} {}", v, r, p),
            _ => self.section.clone().unwrap_or_else(|| self.raw.clone()),
        }
    }
}

/// An assertion in a phase output that needs evidentiary support.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub proposition: String,
    pub citation: Citation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_text: Option<String>,
    /// The only authority offered for its proposition.
    #[serde(default)]
    pub sole_authority: bool,
    /// Supports an element the motion cannot win without.
    #[serde(default)]
    pub dispositive_element: bool,
}

impl Claim {
    /// Stable key so a replayed phase does not insert the same claim twice.
    pub fn dedupe_key(&self, origin: PhaseCode, loop_number: u32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(origin.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(loop_number.to_le_bytes());
        hasher.update(self.proposition.trim().as_bytes());
        hasher.update([0]);
        hasher.update(self.citation.raw.trim().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Verified,
    VerifiedWithNotes,
    NeedsReview,
    Failed,
    /// Lookup unavailable; neither a pass nor a failure.
    Deferred,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "VERIFIED",
            Self::VerifiedWithNotes => "VERIFIED_WITH_NOTES",
            Self::NeedsReview => "NEEDS_REVIEW",
            Self::Failed => "FAILED",
            Self::Deferred => "DEFERRED",
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified | Self::VerifiedWithNotes)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VERIFIED" => Ok(Self::Verified),
            "VERIFIED_WITH_NOTES" => Ok(Self::VerifiedWithNotes),
            "NEEDS_REVIEW" => Ok(Self::NeedsReview),
            "FAILED" => Ok(Self::Failed),
            "DEFERRED" => Ok(Self::Deferred),
            _ => Err(format!("Invalid verdict: {}", s)),
        }
    }
}

/// Per-step scores in [0, 1]. `None` means the step did not run.
/// Every score is oriented so higher is better except `dicta_risk`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepScores {
    pub existence: Option<f64>,
    pub holding: Option<f64>,
    pub dicta_risk: Option<f64>,
    pub quote: Option<f64>,
    pub bad_law: Option<f64>,
    pub authority: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagKind {
    NotFound,
    LookupUnavailable,
    HoldingMismatch,
    HoldingNeedsReview,
    HoldingPartialMatch,
    DictaAsHolding,
    QuoteMinorDiscrepancy,
    QuoteAttorneyReview,
    QuoteFabrication,
    QuoteUnverifiable,
    BadLaw,
    QuestionedTreatment,
    WeakAuthority,
    LowComposite,
}

impl FlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::LookupUnavailable => "LOOKUP_UNAVAILABLE",
            Self::HoldingMismatch => "HOLDING_MISMATCH",
            Self::HoldingNeedsReview => "HOLDING_NEEDS_REVIEW",
            Self::HoldingPartialMatch => "HOLDING_PARTIAL_MATCH",
            Self::DictaAsHolding => "DICTA_AS_HOLDING",
            Self::QuoteMinorDiscrepancy => "QUOTE_MINOR_DISCREPANCY",
            Self::QuoteAttorneyReview => "QUOTE_ATTORNEY_REVIEW",
            Self::QuoteFabrication => "QUOTE_FABRICATION",
            Self::QuoteUnverifiable => "QUOTE_UNVERIFIABLE",
            Self::BadLaw => "BAD_LAW",
            Self::QuestionedTreatment => "QUESTIONED_TREATMENT",
            Self::WeakAuthority => "WEAK_AUTHORITY",
            Self::LowComposite => "LOW_COMPOSITE",
        }
    }

    pub fn severity(&self) -> FlagSeverity {
        match self {
            Self::NotFound
            | Self::HoldingMismatch
            | Self::QuoteFabrication
            | Self::BadLaw
            | Self::LowComposite => FlagSeverity::Block,
            Self::LookupUnavailable
            | Self::HoldingNeedsReview
            | Self::DictaAsHolding
            | Self::QuoteAttorneyReview
            | Self::QuoteUnverifiable
            | Self::QuestionedTreatment => FlagSeverity::Flag,
            Self::HoldingPartialMatch | Self::QuoteMinorDiscrepancy | Self::WeakAuthority => {
                FlagSeverity::Note
            }
        }
    }

    /// Existence, holding and quote failures count toward the tier ceiling.
    pub fn is_core_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::HoldingMismatch | Self::QuoteFabrication
        )
    }
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub kind: FlagKind,
    pub detail: String,
}

impl Flag {
    pub fn new(kind: FlagKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn severity(&self) -> FlagSeverity {
        self.kind.severity()
    }
}

/// Outcome of the seven verification steps for one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimVerification {
    pub verdict: Verdict,
    pub status: CitationStatus,
    pub verified: bool,
    pub source_id: Option<String>,
    pub scores: StepScores,
    pub composite: f64,
    pub flags: Vec<Flag>,
    pub second_stage: bool,
}

impl ClaimVerification {
    pub fn worst_severity(&self) -> Option<FlagSeverity> {
        self.flags.iter().map(Flag::severity).min()
    }
}

/// Enforce `verified => source_id`. The invalid `(true, None)` pair becomes
/// `(false, Unmatched)`; everything else passes through.
pub fn normalize_verified(
    verified: bool,
    source_id: Option<&str>,
    status: CitationStatus,
) -> (bool, CitationStatus) {
    match (verified, source_id) {
        (true, None) => (false, CitationStatus::Unmatched),
        _ => (verified, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_without_source_normalizes_to_unmatched() {
        assert_eq!(
            normalize_verified(true, None, CitationStatus::BankVerified),
            (false, CitationStatus::Unmatched)
        );
        assert_eq!(
            normalize_verified(true, Some("cl-1"), CitationStatus::DraftVerified),
            (true, CitationStatus::DraftVerified)
        );
        assert_eq!(
            normalize_verified(false, None, CitationStatus::Failed),
            (false, CitationStatus::Failed)
        );
    }

    #[test]
    fn dedupe_key_depends_on_origin_and_loop() {
        let claim = Claim {
            proposition: "Summary judgment is proper".into(),
            citation: Citation {
                raw: "477 U.S. 317".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let a = claim.dedupe_key(PhaseCode::Drafting, 0);
        assert_eq!(a, claim.dedupe_key(PhaseCode::Drafting, 0));
        assert_ne!(a, claim.dedupe_key(PhaseCode::Revisions, 0));
        assert_ne!(a, claim.dedupe_key(PhaseCode::Drafting, 1));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn core_failures_are_blocking() {
        for kind in [FlagKind::NotFound, FlagKind::HoldingMismatch, FlagKind::QuoteFabrication] {
            assert!(kind.is_core_failure());
            assert_eq!(kind.severity(), FlagSeverity::Block);
        }
        assert!(!FlagKind::BadLaw.is_core_failure());
    }

    #[test]
    fn case_name_joins_parties() {
        let citation = Citation {
            plaintiff: Some("Celotex Corp.".into()),
            defendant: Some("Catrett".into()),
            ..Default::default()
        };
        assert_eq!(citation.case_name().as_deref(), Some("Celotex Corp. v. Catrett"));
    }
}
