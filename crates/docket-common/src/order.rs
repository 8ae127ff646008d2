use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{OrderStatus, ParseError, Tier};

/// The kind of motion being drafted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionType {
    SummaryJudgment,
    SummaryAdjudication,
    Dismiss,
    Compel,
    Continuance,
    ProtectiveOrder,
    Other,
}

impl MotionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SummaryJudgment => "summary_judgment",
            Self::SummaryAdjudication => "summary_adjudication",
            Self::Dismiss => "dismiss",
            Self::Compel => "compel",
            Self::Continuance => "continuance",
            Self::ProtectiveOrder => "protective_order",
            Self::Other => "other",
        }
    }

    /// MSJ/MSA motions carry a separate statement of undisputed facts.
    pub fn is_summary_motion(&self) -> bool {
        matches!(self, Self::SummaryJudgment | Self::SummaryAdjudication)
    }
}

impl fmt::Display for MotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MotionType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary_judgment" | "msj" => Ok(Self::SummaryJudgment),
            "summary_adjudication" | "msa" => Ok(Self::SummaryAdjudication),
            "dismiss" | "mtd" | "demurrer" => Ok(Self::Dismiss),
            "compel" => Ok(Self::Compel),
            "continuance" => Ok(Self::Continuance),
            "protective_order" => Ok(Self::ProtectiveOrder),
            "other" => Ok(Self::Other),
            _ => Err(ParseError::new("motion type", s)),
        }
    }
}

/// An order as seen by the workflow engine.
///
/// Intake owns creation; the engine only ever writes `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub tier: Tier,
    pub motion_type: MotionType,
    /// Two-letter state code (`CA`, `LA`, ...) or `FED`.
    pub jurisdiction: String,
    pub filing_deadline: Option<NaiveDate>,
    pub status: OrderStatus,
    pub customer_email: Option<String>,
    /// Amount paid in cents; the refund amount on a terminal hold.
    pub amount_paid_cents: i64,
    pub case_caption: String,
    pub statement_of_facts: String,
}

impl Order {
    pub fn is_california(&self) -> bool {
        self.jurisdiction.eq_ignore_ascii_case("CA")
    }

    pub fn is_federal(&self) -> bool {
        self.jurisdiction.eq_ignore_ascii_case("FED")
    }
}
