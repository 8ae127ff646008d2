//! Citation extraction and the per-claim verification pipeline.
//!
//! This module provides:
//! - `extract`: reporter, short-form, `Id.`, `supra` and statute citations
//! - the seven verification steps, one module each
//! - `pipeline`: batching, concurrency and persistence of results

pub mod authority;
pub mod bad_law;
pub mod confidence;
pub mod dicta;
pub mod existence;
pub mod extract;
pub mod flags;
pub mod holding;
pub mod judge;
pub mod pipeline;
pub mod quote;
pub mod types;

pub use existence::{CaseLawLookup, CaseRecord, ExistenceOutcome, LookupResult, Treatment};
pub use extract::{ExtractedCitation, extract_citations};
pub use judge::StepModels;
pub use pipeline::{BatchReport, CitationPipeline};
pub use types::{
    Citation, CitationKind, Claim, ClaimVerification, Flag, FlagKind, StepScores, Verdict,
    normalize_verified,
};
