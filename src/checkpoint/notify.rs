//! Outbound checkpoint notices. Delivery is fire-and-forget: a failed
//! send is logged and never stops the ladder.

use anyhow::Result;
use async_trait::async_trait;
use docket_common::{CheckpointType, PhaseCode};
use serde::Serialize;
use tracing::info;

use super::ladder::LadderStage;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub checkpoint_id: i64,
    pub order_id: i64,
    pub kind: CheckpointType,
    pub phase: PhaseCode,
    pub stage: String,
    pub recipient: Option<String>,
    pub message: String,
}

impl Notice {
    pub fn message_for(kind: CheckpointType, stage: LadderStage, reason: &str) -> String {
        let lead = match stage {
            LadderStage::Initial => "Action needed",
            LadderStage::Reminder => "Reminder",
            LadderStage::Escalation => "Escalation",
            LadderStage::FinalNotice => "Final notice",
            LadderStage::Terminal => "Closed",
        };
        match (kind, stage) {
            (_, LadderStage::Terminal) => format!(
                "{}: checkpoint {} went unanswered; the order has been closed and refunded.",
                lead, kind
            ),
            (CheckpointType::Hold, _) => format!("{}: the order is on hold. {}", lead, reason),
            _ => format!("{}: checkpoint {} awaits review. {}", lead, kind, reason),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notice) -> Result<()>;
}

/// Writes notices to the log. The default when no mail transport is
/// configured.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notice: &Notice) -> Result<()> {
        info!(
            checkpoint_id = notice.checkpoint_id,
            order_id = notice.order_id,
            kind = %notice.kind,
            stage = %notice.stage,
            recipient = notice.recipient.as_deref().unwrap_or("-"),
            "{}",
            notice.message
        );
        Ok(())
    }
}
