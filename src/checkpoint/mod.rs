//! Checkpoint and hold controller.
//!
//! Checkpoints pause an order until a human answers. Unanswered ones walk
//! the timeout ladder on every `tick`; the terminal step (HOLD and CP3
//! only) refunds and closes the order exactly once.

pub mod billing;
pub mod ladder;
pub mod notify;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use docket_common::{CheckpointType, OrderStatus, PhaseCode, WorkflowStatus};
use serde::Serialize;
use tracing::{info, warn};

pub use billing::{LoggingRefundGateway, RefundGateway};
pub use ladder::{Ladder, LadderStage};
pub use notify::{Notice, Notifier, TracingNotifier};

use crate::config::HoldLadderConfig;
use crate::errors::PipelineError;
use crate::executor::ActiveRuns;
use crate::store::{AutoActionOutcome, Checkpoint, DbHandle, NewCheckpoint, Refund};

/// What one `tick` did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub examined: usize,
    pub notices_sent: usize,
    pub auto_actioned: Vec<i64>,
    pub refunds_issued: usize,
}

/// What resolving a checkpoint means for the order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResolveOutcome {
    /// The order can be run again from this phase.
    Resume(PhaseCode),
    /// CP3 sign-off; the order is complete.
    Completed,
    /// The checkpoint was no longer pending.
    AlreadyClosed,
}

pub struct CheckpointController {
    db: DbHandle,
    notifier: Arc<dyn Notifier>,
    refunds: Arc<dyn RefundGateway>,
    ladder: HoldLadderConfig,
    runs: ActiveRuns,
}

impl CheckpointController {
    pub fn new(
        db: DbHandle,
        notifier: Arc<dyn Notifier>,
        refunds: Arc<dyn RefundGateway>,
        ladder: HoldLadderConfig,
        runs: ActiveRuns,
    ) -> Self {
        Self {
            db,
            notifier,
            refunds,
            ladder,
            runs,
        }
    }

    pub fn ladder_for(&self, kind: CheckpointType) -> Ladder {
        Ladder::for_checkpoint(kind, &self.ladder)
    }

    /// Upcoming ladder step for a pending checkpoint.
    pub fn next_action(
        &self,
        checkpoint: &Checkpoint,
        now: DateTime<Utc>,
    ) -> Option<(LadderStage, DateTime<Utc>)> {
        self.ladder_for(checkpoint.kind)
            .next_action(checkpoint.created_at, now)
    }

    /// Raise a checkpoint and pause the order. Raising the same open
    /// checkpoint again returns the existing one and sends nothing.
    pub async fn create(
        &self,
        order_id: i64,
        kind: CheckpointType,
        phase: PhaseCode,
        resume_phase: Option<PhaseCode>,
        reason: &str,
    ) -> Result<Checkpoint> {
        self.create_at(order_id, kind, phase, resume_phase, reason, Utc::now())
            .await
    }

    pub async fn create_at(
        &self,
        order_id: i64,
        kind: CheckpointType,
        phase: PhaseCode,
        resume_phase: Option<PhaseCode>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        let new = NewCheckpoint {
            order_id,
            kind,
            phase,
            resume_phase,
            reason: reason.to_string(),
            timeout_schedule: self.ladder_for(kind).schedule(now),
        };
        let order_status = match kind {
            CheckpointType::Hold => OrderStatus::OnHold,
            _ => OrderStatus::PendingReview,
        };
        let (checkpoint, created) = self
            .db
            .call(move |db| {
                let created = db.create_checkpoint(&new, now)?;
                db.set_order_status(order_id, order_status)?;
                db.set_workflow_status(order_id, WorkflowStatus::Blocked)?;
                Ok(created)
            })
            .await?;

        if created {
            info!(
                order_id,
                checkpoint_id = checkpoint.id,
                kind = %kind,
                phase = %phase,
                "Checkpoint raised"
            );
            self.send(&checkpoint, LadderStage::Initial, now).await?;
        }
        Ok(checkpoint)
    }

    /// Answer a pending checkpoint. Resolving CP3 completes the order;
    /// anything else makes the order runnable again from its resume phase.
    pub async fn resolve(
        &self,
        checkpoint_id: i64,
        resolved_by: &str,
        resolution: &str,
    ) -> Result<ResolveOutcome, PipelineError> {
        let now = Utc::now();
        let by = resolved_by.to_string();
        let text = resolution.to_string();
        let outcome = self
            .db
            .call(move |db| {
                let Some(checkpoint) = db.get_checkpoint(checkpoint_id)? else {
                    return Ok(None);
                };
                if !db.resolve_checkpoint(checkpoint_id, &by, &text, now)? {
                    return Ok(Some(ResolveOutcome::AlreadyClosed));
                }
                let order_id = checkpoint.order_id;
                if checkpoint.kind == CheckpointType::Cp3 {
                    db.set_order_status(order_id, OrderStatus::Completed)?;
                    db.set_workflow_status(order_id, WorkflowStatus::Completed)?;
                    return Ok(Some(ResolveOutcome::Completed));
                }
                let resume = checkpoint.resume_phase.unwrap_or(checkpoint.phase);
                db.set_current_phase(order_id, resume)?;
                db.set_workflow_status(order_id, WorkflowStatus::InProgress)?;
                db.set_order_status(order_id, OrderStatus::InProgress)?;
                Ok(Some(ResolveOutcome::Resume(resume)))
            })
            .await?;
        let outcome = outcome.ok_or(PipelineError::CheckpointNotFound { id: checkpoint_id })?;
        info!(checkpoint_id, resolved_by, ?outcome, "Checkpoint resolved");
        Ok(outcome)
    }

    /// Walk every pending checkpoint up the ladder. Safe to run from any
    /// number of schedulers: notices are deduplicated per stage and the
    /// terminal action is a conditional update.
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let pending = self.db.call(|db| db.list_pending_checkpoints()).await?;
        let mut report = TickReport {
            examined: pending.len(),
            ..Default::default()
        };

        for checkpoint in pending {
            let stage = self
                .ladder_for(checkpoint.kind)
                .stage_at(checkpoint.created_at, now);
            match stage {
                LadderStage::Initial => {}
                LadderStage::Terminal => {
                    if let Some(refund) = self.auto_action(&checkpoint, now).await? {
                        report.auto_actioned.push(checkpoint.id);
                        report.notices_sent += 1;
                        if self.issue(&refund).await? {
                            report.refunds_issued += 1;
                        }
                    }
                }
                stage => {
                    if self.send(&checkpoint, stage, now).await? {
                        report.notices_sent += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn auto_action(&self, checkpoint: &Checkpoint, now: DateTime<Utc>) -> Result<Option<Refund>> {
        let id = checkpoint.id;
        let outcome = self
            .db
            .call(move |db| db.auto_action_checkpoint(id, now))
            .await?;
        match outcome {
            AutoActionOutcome::Fired { refund } => {
                warn!(
                    order_id = checkpoint.order_id,
                    checkpoint_id = id,
                    kind = %checkpoint.kind,
                    amount_cents = refund.amount_cents,
                    "Checkpoint timed out, order refunded and closed"
                );
                self.runs.cancel(checkpoint.order_id);
                self.send(checkpoint, LadderStage::Terminal, now).await?;
                Ok(Some(refund))
            }
            AutoActionOutcome::AlreadyHandled => Ok(None),
        }
    }

    /// Record and send one ladder notice. Returns `false` when the stage
    /// was already sent. A failed delivery is logged and still counts as
    /// sent.
    async fn send(&self, checkpoint: &Checkpoint, stage: LadderStage, now: DateTime<Utc>) -> Result<bool> {
        let id = checkpoint.id;
        let order_id = checkpoint.order_id;
        let stage_name = stage.as_str();
        let (claimed, recipient) = self
            .db
            .call(move |db| {
                let claimed = db.record_notification(id, stage_name, now)?;
                let recipient = db.get_order(order_id)?.and_then(|o| o.customer_email);
                Ok((claimed, recipient))
            })
            .await?;
        if !claimed {
            return Ok(false);
        }
        let notice = Notice {
            checkpoint_id: id,
            order_id,
            kind: checkpoint.kind,
            phase: checkpoint.phase,
            stage: stage_name.to_string(),
            recipient,
            message: Notice::message_for(checkpoint.kind, stage, &checkpoint.reason),
        };
        if let Err(e) = self.notifier.notify(&notice).await {
            warn!(checkpoint_id = id, stage = stage_name, error = %e, "Notification failed");
        }
        Ok(true)
    }

    async fn issue(&self, refund: &Refund) -> Result<bool> {
        let key = billing::idempotency_key(refund);
        let refund_id = refund.id;
        match self.refunds.issue_refund(refund, &key).await {
            Ok(()) => {
                self.db
                    .call(move |db| db.mark_refund_issued(refund_id, Utc::now()))
                    .await
            }
            Err(e) => {
                warn!(refund_id, order_id = refund.order_id, error = %e, "Refund failed, will retry");
                let message = e.to_string();
                self.db
                    .call(move |db| db.mark_refund_failed(refund_id, &message))
                    .await?;
                Ok(false)
            }
        }
    }

    /// Reissue every refund that is not yet confirmed. Returns how many
    /// went through.
    pub async fn retry_pending_refunds(&self) -> Result<usize> {
        let pending = self.db.call(|db| db.pending_refunds()).await?;
        let mut issued = 0;
        for refund in &pending {
            if self.issue(refund).await? {
                issued += 1;
            }
        }
        if !pending.is_empty() {
            info!(pending = pending.len(), issued, "Refund retry pass");
        }
        Ok(issued)
    }

    /// External cancellation. The order and workflow are closed and any
    /// live run is stopped; pending checkpoints are cancelled best-effort
    /// and a failure there does not fail the cancellation.
    pub async fn cancel_order(&self, order_id: i64) -> Result<bool, PipelineError> {
        let changed = self
            .db
            .call(move |db| {
                if db.get_order(order_id)?.is_none() {
                    return Ok(None);
                }
                let changed = db.set_order_status(order_id, OrderStatus::Cancelled)?;
                db.set_workflow_status(order_id, WorkflowStatus::Cancelled)?;
                Ok(Some(changed))
            })
            .await?
            .ok_or(PipelineError::OrderNotFound { id: order_id })?;
        let stopped = self.runs.cancel(order_id);
        info!(order_id, changed, stopped_live_run = stopped, "Order cancelled");

        match self
            .db
            .call(move |db| db.cancel_pending_checkpoints(order_id, Utc::now()))
            .await
        {
            Ok(n) if n > 0 => info!(order_id, cancelled = n, "Pending checkpoints cancelled"),
            Ok(_) => {}
            Err(e) => warn!(order_id, error = %e, "Could not cancel checkpoints"),
        }
        Ok(changed)
    }
}
