//! Shared domain types for the docket workflow engine.
//!
//! Everything that crosses a persistence or crate boundary lives here as a
//! closed enum with a stable string form (`as_str` / `FromStr`), so the
//! store, the executor and the CLI agree on spelling without free-form
//! strings.

pub mod order;
pub mod phase_code;
pub mod status;
pub mod tier;

pub use order::{MotionType, Order};
pub use phase_code::PhaseCode;
pub use status::{
    CheckpointState, CheckpointType, CitationStatus, FlagSeverity, OrderStatus, PhaseStatus,
    WorkflowStatus,
};
pub use tier::Tier;

use thiserror::Error;

/// Returned by every `FromStr` impl in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
