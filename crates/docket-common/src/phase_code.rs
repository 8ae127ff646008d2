use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// One of the fourteen stages of the drafting pipeline.
///
/// Declaration order is the fixed topology order; `PhaseCode::ALL` and the
/// derived `Ord` both follow it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PhaseCode {
    #[serde(rename = "I")]
    Intake,
    #[serde(rename = "II")]
    LegalStandards,
    #[serde(rename = "III")]
    EvidenceStrategy,
    #[serde(rename = "IV")]
    AuthorityResearch,
    #[serde(rename = "V")]
    Drafting,
    #[serde(rename = "V.1")]
    CitationCheck,
    #[serde(rename = "VI")]
    OppositionAnticipation,
    #[serde(rename = "VII")]
    JudgeSimulation,
    #[serde(rename = "VII.1")]
    PostRevisionCitationCheck,
    #[serde(rename = "VIII")]
    Revisions,
    #[serde(rename = "VIII.5")]
    CaptionValidation,
    #[serde(rename = "IX")]
    SupportingDocuments,
    #[serde(rename = "IX.1")]
    SeparateStatementCheck,
    #[serde(rename = "X")]
    FinalAssembly,
}

impl PhaseCode {
    pub const ALL: [PhaseCode; 14] = [
        PhaseCode::Intake,
        PhaseCode::LegalStandards,
        PhaseCode::EvidenceStrategy,
        PhaseCode::AuthorityResearch,
        PhaseCode::Drafting,
        PhaseCode::CitationCheck,
        PhaseCode::OppositionAnticipation,
        PhaseCode::JudgeSimulation,
        PhaseCode::PostRevisionCitationCheck,
        PhaseCode::Revisions,
        PhaseCode::CaptionValidation,
        PhaseCode::SupportingDocuments,
        PhaseCode::SeparateStatementCheck,
        PhaseCode::FinalAssembly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "I",
            Self::LegalStandards => "II",
            Self::EvidenceStrategy => "III",
            Self::AuthorityResearch => "IV",
            Self::Drafting => "V",
            Self::CitationCheck => "V.1",
            Self::OppositionAnticipation => "VI",
            Self::JudgeSimulation => "VII",
            Self::PostRevisionCitationCheck => "VII.1",
            Self::Revisions => "VIII",
            Self::CaptionValidation => "VIII.5",
            Self::SupportingDocuments => "IX",
            Self::SeparateStatementCheck => "IX.1",
            Self::FinalAssembly => "X",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Intake => "Intake review",
            Self::LegalStandards => "Legal standards",
            Self::EvidenceStrategy => "Evidence strategy",
            Self::AuthorityResearch => "Authority research",
            Self::Drafting => "Drafting",
            Self::CitationCheck => "Citation accuracy check",
            Self::OppositionAnticipation => "Opposition anticipation",
            Self::JudgeSimulation => "Judge simulation",
            Self::PostRevisionCitationCheck => "Post-revision citation check",
            Self::Revisions => "Revisions",
            Self::CaptionValidation => "Caption validation",
            Self::SupportingDocuments => "Supporting documents",
            Self::SeparateStatementCheck => "Separate statement check",
            Self::FinalAssembly => "Final assembly",
        }
    }

    /// Position in the fixed topology (0-based).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Phases only entered through a revision loop; a passing judge
    /// simulation jumps over them.
    pub fn is_revision_only(&self) -> bool {
        matches!(self, Self::PostRevisionCitationCheck | Self::Revisions)
    }

    /// Phases that run the citation verification sub-pipeline.
    pub fn verifies_claims(&self) -> bool {
        matches!(self, Self::CitationCheck | Self::PostRevisionCitationCheck)
    }

    /// Phases whose output carries citations that become claims.
    pub fn emits_claims(&self) -> bool {
        matches!(
            self,
            Self::AuthorityResearch | Self::Drafting | Self::Revisions
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalAssembly)
    }
}

impl fmt::Display for PhaseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseCode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        PhaseCode::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseError::new("phase code", s))
    }
}
