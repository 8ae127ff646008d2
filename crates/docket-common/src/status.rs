//! Lifecycle and classification enums persisted by the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    InProgress,
    OnHold,
    PendingReview,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::InProgress => "in_progress",
            Self::OnHold => "on_hold",
            Self::PendingReview => "pending_review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// No further phase may be dispatched for an order in a final status.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Refunded)
    }
}

impl FromStr for OrderStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "in_progress" => Ok(Self::InProgress),
            "on_hold" => Ok(Self::OnHold),
            "pending_review" => Ok(Self::PendingReview),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(ParseError::new("order status", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl FromStr for WorkflowStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseError::new("workflow status", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Completed,
    Blocked,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PhaseStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseError::new("phase status", s)),
        }
    }
}

/// Source-matching status of a citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStatus {
    /// Found, verified, and present in the research citation bank.
    BankVerified,
    /// Found and verified, introduced during drafting.
    DraftVerified,
    /// No matching source record.
    Unmatched,
    /// Source found but the claim failed verification.
    Failed,
    /// A dependency was unavailable; retry later.
    VerificationDeferred,
}

impl CitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankVerified => "bank_verified",
            Self::DraftVerified => "draft_verified",
            Self::Unmatched => "unmatched",
            Self::Failed => "failed",
            Self::VerificationDeferred => "verification_deferred",
        }
    }
}

impl FromStr for CitationStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_verified" => Ok(Self::BankVerified),
            "draft_verified" => Ok(Self::DraftVerified),
            "unmatched" => Ok(Self::Unmatched),
            "failed" => Ok(Self::Failed),
            "verification_deferred" => Ok(Self::VerificationDeferred),
            _ => Err(ParseError::new("citation status", s)),
        }
    }
}

/// Severity of a compiled verification flag.
///
/// Ordered from most to least severe, so `min()` over a flag list yields
/// the worst one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagSeverity {
    /// Claim cannot be used; it must be replaced.
    Block,
    /// A human must confirm before use.
    Flag,
    /// Informational only.
    Note,
}

impl FlagSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "BLOCK",
            Self::Flag => "FLAG",
            Self::Note => "NOTE",
        }
    }
}

impl fmt::Display for FlagSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointType {
    #[serde(rename = "CP1")]
    Cp1,
    #[serde(rename = "CP2")]
    Cp2,
    #[serde(rename = "CP3")]
    Cp3,
    #[serde(rename = "HOLD")]
    Hold,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cp1 => "CP1",
            Self::Cp2 => "CP2",
            Self::Cp3 => "CP3",
            Self::Hold => "HOLD",
        }
    }
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CP1" => Ok(Self::Cp1),
            "CP2" => Ok(Self::Cp2),
            "CP3" => Ok(Self::Cp3),
            "HOLD" => Ok(Self::Hold),
            _ => Err(ParseError::new("checkpoint type", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointState {
    Pending,
    Resolved,
    Cancelled,
    AutoActioned,
}

impl CheckpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Resolved => "RESOLVED",
            Self::Cancelled => "CANCELLED",
            Self::AutoActioned => "AUTO_ACTIONED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for CheckpointState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RESOLVED" => Ok(Self::Resolved),
            "CANCELLED" => Ok(Self::Cancelled),
            "AUTO_ACTIONED" => Ok(Self::AutoActioned),
            _ => Err(ParseError::new("checkpoint state", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_flag_severity_is_minimum() {
        let flags = [FlagSeverity::Note, FlagSeverity::Block, FlagSeverity::Flag];
        assert_eq!(flags.iter().min(), Some(&FlagSeverity::Block));
    }

    #[test]
    fn only_pending_checkpoints_are_open() {
        assert!(!CheckpointState::Pending.is_terminal());
        assert!(CheckpointState::Resolved.is_terminal());
        assert!(CheckpointState::Cancelled.is_terminal());
        assert!(CheckpointState::AutoActioned.is_terminal());
    }

    #[test]
    fn final_order_statuses_stop_dispatch() {
        assert!(OrderStatus::Refunded.is_final());
        assert!(OrderStatus::Cancelled.is_final());
        assert!(!OrderStatus::OnHold.is_final());
    }

    #[test]
    fn checkpoint_type_serializes_as_code() {
        assert_eq!(serde_json::to_string(&CheckpointType::Hold).unwrap(), "\"HOLD\"");
        assert_eq!("cp3".parse::<CheckpointType>().unwrap(), CheckpointType::Cp3);
    }

    #[test]
    fn citation_status_round_trips_through_str() {
        let s = CitationStatus::VerificationDeferred;
        assert_eq!(s.as_str().parse::<CitationStatus>().unwrap(), s);
    }
}
