use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use docket_common::{
    CheckpointState, CheckpointType, CitationStatus, MotionType, PhaseCode, PhaseStatus, Tier,
    WorkflowStatus,
};
use serde::{Deserialize, Serialize};

use crate::citation::{Claim, ClaimVerification, Flag, StepScores, Verdict};
use crate::gateway::ModelTier;

/// Intake-side fields for a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub tier: Tier,
    pub motion_type: MotionType,
    pub jurisdiction: String,
    #[serde(default)]
    pub filing_deadline: Option<NaiveDate>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub amount_paid_cents: i64,
    #[serde(default)]
    pub case_caption: String,
    #[serde(default)]
    pub statement_of_facts: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub order_id: i64,
    pub current_phase: PhaseCode,
    pub revision_loops: u32,
    pub claim_count: u32,
    pub status: WorkflowStatus,
    pub protocol10_triggered: bool,
    pub cost_cap_triggered: bool,
    pub last_grade: Option<String>,
    pub last_loop_execution_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPhaseExecution {
    pub order_id: i64,
    pub phase: PhaseCode,
    pub loop_number: u32,
    pub status: PhaseStatus,
    pub model: Option<String>,
    pub model_tier: Option<ModelTier>,
    pub thinking_budget: Option<u32>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub id: i64,
    pub order_id: i64,
    pub phase: PhaseCode,
    pub attempt: u32,
    pub loop_number: u32,
    pub status: PhaseStatus,
    pub model: Option<String>,
    pub model_tier: Option<ModelTier>,
    pub thinking_budget: Option<u32>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredClaim {
    pub id: i64,
    pub order_id: i64,
    pub origin_phase: PhaseCode,
    pub loop_number: u32,
    pub claim: Claim,
    /// `None` until verified.
    pub status: Option<CitationStatus>,
    pub verified: bool,
    pub source_id: Option<String>,
    pub scores: StepScores,
    pub composite: Option<f64>,
    pub verdict: Option<Verdict>,
    pub flags: Vec<Flag>,
    pub verified_phase: Option<PhaseCode>,
    pub verified_loop: Option<u32>,
}

impl StoredClaim {
    /// Never verified, or deferred because a dependency was down.
    pub fn is_pending(&self) -> bool {
        matches!(self.verdict, None | Some(Verdict::Deferred))
    }

    /// The stored result as a verification, for claims already checked.
    pub fn verification(&self) -> Option<ClaimVerification> {
        Some(ClaimVerification {
            verdict: self.verdict?,
            status: self.status?,
            verified: self.verified,
            source_id: self.source_id.clone(),
            scores: self.scores,
            composite: self.composite.unwrap_or(0.0),
            flags: self.flags.clone(),
            second_stage: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub order_id: i64,
    pub kind: CheckpointType,
    pub phase: PhaseCode,
    pub resume_phase: Option<PhaseCode>,
    pub reason: String,
    pub state: CheckpointState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution: Option<String>,
    /// Reminder timestamps computed at creation, in ladder order.
    pub timeout_schedule: Vec<DateTime<Utc>>,
    pub auto_actioned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckpoint {
    pub order_id: i64,
    pub kind: CheckpointType,
    pub phase: PhaseCode,
    pub resume_phase: Option<PhaseCode>,
    pub reason: String,
    pub timeout_schedule: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub order_id: i64,
    pub phase: PhaseCode,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub amount_nanos: i64,
    pub is_rework_reset: bool,
    pub execution_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclosureKind {
    RevisionLimit,
    CostCap,
}

impl DisclosureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RevisionLimit => "revision_limit",
            Self::CostCap => "cost_cap",
        }
    }
}

impl fmt::Display for DisclosureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisclosureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "revision_limit" => Ok(Self::RevisionLimit),
            "cost_cap" => Ok(Self::CostCap),
            _ => Err(format!("Invalid disclosure kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disclosure {
    pub id: i64,
    pub order_id: i64,
    pub kind: DisclosureKind,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Issued,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Issued => "issued",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "issued" => Ok(Self::Issued),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid refund status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub order_id: i64,
    pub checkpoint_id: i64,
    pub amount_cents: i64,
    pub status: RefundStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
}

/// Result of the single-fire terminal auto-action.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoActionOutcome {
    /// This call won the conditional update; the refund row is pending.
    Fired { refund: Refund },
    /// Already actioned, resolved or cancelled.
    AlreadyHandled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    pub order_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Everything `docket order show` prints.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub order: docket_common::Order,
    pub workflow: Option<Workflow>,
    pub executions: Vec<PhaseExecution>,
    pub open_checkpoints: Vec<Checkpoint>,
    pub disclosures: Vec<Disclosure>,
    pub spend_nanos: i64,
    pub spend_nanos_unfiltered: i64,
    pub claim_counts: Vec<(String, i64)>,
}
