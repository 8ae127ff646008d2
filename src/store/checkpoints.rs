use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use docket_common::{CheckpointState, OrderStatus, WorkflowStatus};
use rusqlite::{OptionalExtension, params};

use super::{
    AutoActionOutcome, Checkpoint, DocketDb, NewCheckpoint, Refund, RefundStatus, fmt_ts,
    parse_enum, parse_opt_ts, parse_ts,
};

struct CheckpointRow {
    id: i64,
    order_id: i64,
    kind: String,
    phase: String,
    resume_phase: Option<String>,
    reason: String,
    state: String,
    created_at: String,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
    resolution: Option<String>,
    timeout_schedule: String,
    auto_actioned: bool,
}

impl CheckpointRow {
    fn into_checkpoint(self) -> Result<Checkpoint> {
        Ok(Checkpoint {
            id: self.id,
            order_id: self.order_id,
            kind: parse_enum(&self.kind, "checkpoint type")?,
            phase: parse_enum(&self.phase, "checkpoint phase")?,
            resume_phase: self
                .resume_phase
                .as_deref()
                .map(|p| parse_enum(p, "resume phase"))
                .transpose()?,
            reason: self.reason,
            state: parse_enum(&self.state, "checkpoint state")?,
            created_at: parse_ts(&self.created_at)?,
            resolved_at: parse_opt_ts(self.resolved_at)?,
            resolved_by: self.resolved_by,
            resolution: self.resolution,
            timeout_schedule: serde_json::from_str(&self.timeout_schedule)
                .context("Failed to parse timeout schedule")?,
            auto_actioned: self.auto_actioned,
        })
    }
}

const CHECKPOINT_COLUMNS: &str = "id, order_id, kind, phase, resume_phase, reason, state, created_at, resolved_at, resolved_by, resolution, timeout_schedule, auto_actioned";

fn read_checkpoint_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckpointRow> {
    Ok(CheckpointRow {
        id: row.get(0)?,
        order_id: row.get(1)?,
        kind: row.get(2)?,
        phase: row.get(3)?,
        resume_phase: row.get(4)?,
        reason: row.get(5)?,
        state: row.get(6)?,
        created_at: row.get(7)?,
        resolved_at: row.get(8)?,
        resolved_by: row.get(9)?,
        resolution: row.get(10)?,
        timeout_schedule: row.get(11)?,
        auto_actioned: row.get(12)?,
    })
}

const REFUND_COLUMNS: &str =
    "id, order_id, checkpoint_id, amount_cents, status, attempts, last_error, created_at, issued_at";

type RefundTuple = (i64, i64, i64, i64, String, u32, Option<String>, String, Option<String>);

fn read_refund(row: &rusqlite::Row<'_>) -> rusqlite::Result<RefundTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_refund(t: RefundTuple) -> Result<Refund> {
    let (id, order_id, checkpoint_id, amount_cents, status, attempts, last_error, created_at, issued_at) = t;
    Ok(Refund {
        id,
        order_id,
        checkpoint_id,
        amount_cents,
        status: parse_enum(&status, "refund status")?,
        attempts,
        last_error,
        created_at: parse_ts(&created_at)?,
        issued_at: parse_opt_ts(issued_at)?,
    })
}

impl DocketDb {
    // ── Checkpoints ───────────────────────────────────────────────────

    /// Open a checkpoint, or return the one already pending for the same
    /// (order, type, phase). The bool is whether this call created it.
    pub fn create_checkpoint(
        &self,
        new: &NewCheckpoint,
        now: DateTime<Utc>,
    ) -> Result<(Checkpoint, bool)> {
        let schedule: Vec<String> = new.timeout_schedule.iter().map(|t| fmt_ts(*t)).collect();
        let schedule =
            serde_json::to_string(&schedule).context("Failed to serialize timeout schedule")?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO checkpoints (order_id, kind, phase, resume_phase, reason, created_at, timeout_schedule)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.order_id,
                    new.kind.as_str(),
                    new.phase.as_str(),
                    new.resume_phase.map(|p| p.as_str()),
                    new.reason,
                    fmt_ts(now),
                    schedule,
                ],
            )
            .context("Failed to insert checkpoint")?;
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM checkpoints
                     WHERE order_id = ?1 AND kind = ?2 AND phase = ?3 AND state = 'PENDING'",
                    CHECKPOINT_COLUMNS
                ),
                params![new.order_id, new.kind.as_str(), new.phase.as_str()],
                read_checkpoint_row,
            )
            .context("Pending checkpoint not found after insert")?;
        Ok((row.into_checkpoint()?, inserted > 0))
    }

    pub fn get_checkpoint(&self, id: i64) -> Result<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM checkpoints WHERE id = ?1", CHECKPOINT_COLUMNS),
                params![id],
                read_checkpoint_row,
            )
            .optional()
            .context("Failed to query checkpoint")?;
        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    pub fn list_checkpoints(&self, order_id: i64) -> Result<Vec<Checkpoint>> {
        self.query_checkpoints(
            &format!(
                "SELECT {} FROM checkpoints WHERE order_id = ?1 ORDER BY id",
                CHECKPOINT_COLUMNS
            ),
            params![order_id],
        )
    }

    /// Every pending checkpoint across all orders, oldest first.
    pub fn list_pending_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.query_checkpoints(
            &format!(
                "SELECT {} FROM checkpoints WHERE state = 'PENDING' ORDER BY created_at, id",
                CHECKPOINT_COLUMNS
            ),
            [],
        )
    }

    fn query_checkpoints<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Checkpoint>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare checkpoint query")?;
        let rows = stmt
            .query_map(params, read_checkpoint_row)
            .context("Failed to query checkpoints")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read checkpoint row")?.into_checkpoint()?);
        }
        Ok(out)
    }

    /// Resolve a pending checkpoint. A checkpoint that already left PENDING
    /// is untouched and `false` is returned.
    pub fn resolve_checkpoint(
        &self,
        id: i64,
        resolved_by: &str,
        resolution: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE checkpoints SET state = 'RESOLVED', resolved_at = ?2, resolved_by = ?3, resolution = ?4
                 WHERE id = ?1 AND state = 'PENDING'",
                params![id, fmt_ts(now), resolved_by, resolution],
            )
            .context("Failed to resolve checkpoint")?;
        Ok(changed > 0)
    }

    /// Cancel every pending checkpoint of an order. Returns how many moved.
    pub fn cancel_pending_checkpoints(&self, order_id: i64, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE checkpoints SET state = 'CANCELLED', resolved_at = ?2, resolved_by = 'system', resolution = 'order cancelled'
                 WHERE order_id = ?1 AND state = 'PENDING'",
                params![order_id, fmt_ts(now)],
            )
            .context("Failed to cancel checkpoints")
    }

    /// Terminal ladder action. One transaction: flip the checkpoint with a
    /// conditional update, queue the refund, close the order and workflow.
    /// Only the caller whose update matched a row gets `Fired`.
    pub fn auto_action_checkpoint(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<AutoActionOutcome> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin auto-action")?;
        let changed = tx
            .execute(
                "UPDATE checkpoints
                 SET state = 'AUTO_ACTIONED', auto_actioned = 1, resolved_at = ?2, resolved_by = 'system', resolution = 'auto-refund'
                 WHERE id = ?1 AND state = 'PENDING' AND auto_actioned = 0",
                params![id, fmt_ts(now)],
            )
            .context("Failed to mark checkpoint auto-actioned")?;
        if changed == 0 {
            return Ok(AutoActionOutcome::AlreadyHandled);
        }
        let (order_id, amount_cents): (i64, i64) = tx
            .query_row(
                "SELECT o.id, o.amount_paid_cents FROM checkpoints c JOIN orders o ON o.id = c.order_id
                 WHERE c.id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to load order for auto-action")?;
        tx.execute(
            "INSERT OR IGNORE INTO refunds (order_id, checkpoint_id, amount_cents, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![order_id, id, amount_cents, fmt_ts(now)],
        )
        .context("Failed to queue refund")?;
        tx.execute(
            "UPDATE orders SET status = ?1 WHERE id = ?2",
            params![OrderStatus::Refunded.as_str(), order_id],
        )
        .context("Failed to mark order refunded")?;
        tx.execute(
            "UPDATE workflows SET status = ?1, updated_at = datetime('now') WHERE order_id = ?2",
            params![WorkflowStatus::Cancelled.as_str(), order_id],
        )
        .context("Failed to cancel workflow")?;
        tx.execute(
            "UPDATE checkpoints SET state = 'CANCELLED', resolved_at = ?2, resolved_by = 'system', resolution = 'order refunded'
             WHERE order_id = ?1 AND state = 'PENDING'",
            params![order_id, fmt_ts(now)],
        )
        .context("Failed to cancel sibling checkpoints")?;
        let refund = tx
            .query_row(
                &format!("SELECT {} FROM refunds WHERE checkpoint_id = ?1", REFUND_COLUMNS),
                params![id],
                read_refund,
            )
            .context("Refund not found after insert")?;
        tx.commit().context("Failed to commit auto-action")?;
        Ok(AutoActionOutcome::Fired {
            refund: into_refund(refund)?,
        })
    }

    // ── Notifications ─────────────────────────────────────────────────

    /// Claim the right to send `stage` for a checkpoint. Returns `false`
    /// when that stage was already sent.
    pub fn record_notification(
        &self,
        checkpoint_id: i64,
        stage: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO notifications (checkpoint_id, stage, sent_at) VALUES (?1, ?2, ?3)",
                params![checkpoint_id, stage, fmt_ts(now)],
            )
            .context("Failed to record notification")?;
        Ok(changed > 0)
    }

    pub fn notification_stages(&self, checkpoint_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT stage FROM notifications WHERE checkpoint_id = ?1 ORDER BY id")
            .context("Failed to prepare notification query")?;
        let stages = stmt
            .query_map(params![checkpoint_id], |row| row.get(0))
            .context("Failed to query notifications")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read notifications")?;
        Ok(stages)
    }

    // ── Refunds ───────────────────────────────────────────────────────

    /// Refunds not yet issued, oldest first.
    pub fn pending_refunds(&self) -> Result<Vec<Refund>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM refunds WHERE status != 'issued' ORDER BY id",
                REFUND_COLUMNS
            ))
            .context("Failed to prepare refund query")?;
        let rows = stmt.query_map([], read_refund).context("Failed to query refunds")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(into_refund(row.context("Failed to read refund row")?)?);
        }
        Ok(out)
    }

    pub fn list_refunds(&self, order_id: i64) -> Result<Vec<Refund>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM refunds WHERE order_id = ?1 ORDER BY id",
                REFUND_COLUMNS
            ))
            .context("Failed to prepare refund query")?;
        let rows = stmt
            .query_map(params![order_id], read_refund)
            .context("Failed to query refunds")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(into_refund(row.context("Failed to read refund row")?)?);
        }
        Ok(out)
    }

    pub fn mark_refund_issued(&self, refund_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE refunds SET status = ?2, attempts = attempts + 1, issued_at = ?3, last_error = NULL
                 WHERE id = ?1 AND status != 'issued'",
                params![refund_id, RefundStatus::Issued.as_str(), fmt_ts(now)],
            )
            .context("Failed to mark refund issued")?;
        Ok(changed > 0)
    }

    pub fn mark_refund_failed(&self, refund_id: i64, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE refunds SET status = ?2, attempts = attempts + 1, last_error = ?3
                 WHERE id = ?1 AND status != 'issued'",
                params![refund_id, RefundStatus::Failed.as_str(), error],
            )
            .context("Failed to mark refund failed")?;
        Ok(())
    }

    pub fn checkpoint_state(&self, id: i64) -> Result<Option<CheckpointState>> {
        let state: Option<String> = self
            .conn
            .query_row(
                "SELECT state FROM checkpoints WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query checkpoint state")?;
        state.map(|s| parse_enum(&s, "checkpoint state")).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::db_with_order;
    use docket_common::{CheckpointType, PhaseCode, Tier};

    fn hold(order_id: i64) -> NewCheckpoint {
        NewCheckpoint {
            order_id,
            kind: CheckpointType::Hold,
            phase: PhaseCode::EvidenceStrategy,
            resume_phase: Some(PhaseCode::EvidenceStrategy),
            reason: "missing declarations".into(),
            timeout_schedule: vec![Utc::now()],
        }
    }

    #[test]
    fn test_create_checkpoint_is_idempotent_while_pending() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        let now = Utc::now();
        let (first, created) = db.create_checkpoint(&hold(order.id), now)?;
        assert!(created);
        let (again, created) = db.create_checkpoint(&hold(order.id), now)?;
        assert!(!created);
        assert_eq!(first.id, again.id);
        assert_eq!(first.timeout_schedule.len(), 1);

        db.resolve_checkpoint(first.id, "attorney", "declarations uploaded", now)?;
        let (third, created) = db.create_checkpoint(&hold(order.id), now)?;
        assert!(created);
        assert_ne!(third.id, first.id);
        Ok(())
    }

    #[test]
    fn test_resolve_only_moves_pending() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        let now = Utc::now();
        let (cp, _) = db.create_checkpoint(&hold(order.id), now)?;
        assert!(db.resolve_checkpoint(cp.id, "attorney", "ok", now)?);
        assert!(!db.resolve_checkpoint(cp.id, "admin", "again", now)?);
        let stored = db.get_checkpoint(cp.id)?.unwrap();
        assert_eq!(stored.state, CheckpointState::Resolved);
        assert_eq!(stored.resolved_by.as_deref(), Some("attorney"));
        Ok(())
    }

    #[test]
    fn test_auto_action_fires_once_with_one_refund() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        db.ensure_workflow(order.id, PhaseCode::Intake)?;
        let now = Utc::now();
        let (cp, _) = db.create_checkpoint(&hold(order.id), now)?;

        let first = db.auto_action_checkpoint(cp.id, now)?;
        let AutoActionOutcome::Fired { refund } = first else {
            panic!("expected first auto-action to fire");
        };
        assert_eq!(refund.amount_cents, 250_000);
        assert_eq!(refund.status, RefundStatus::Pending);

        assert_eq!(db.auto_action_checkpoint(cp.id, now)?, AutoActionOutcome::AlreadyHandled);
        assert_eq!(db.list_refunds(order.id)?.len(), 1);
        assert_eq!(db.get_order(order.id)?.unwrap().status, OrderStatus::Refunded);
        assert_eq!(db.get_workflow(order.id)?.unwrap().status, WorkflowStatus::Cancelled);
        assert_eq!(db.checkpoint_state(cp.id)?, Some(CheckpointState::AutoActioned));
        Ok(())
    }

    #[test]
    fn test_resolved_checkpoint_cannot_auto_action() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        let now = Utc::now();
        let (cp, _) = db.create_checkpoint(&hold(order.id), now)?;
        db.resolve_checkpoint(cp.id, "attorney", "ok", now)?;
        assert_eq!(db.auto_action_checkpoint(cp.id, now)?, AutoActionOutcome::AlreadyHandled);
        assert!(db.pending_refunds()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_notifications_dedupe_per_stage() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        let now = Utc::now();
        let (cp, _) = db.create_checkpoint(&hold(order.id), now)?;
        assert!(db.record_notification(cp.id, "reminder", now)?);
        assert!(!db.record_notification(cp.id, "reminder", now)?);
        assert!(db.record_notification(cp.id, "escalation", now)?);
        assert_eq!(db.notification_stages(cp.id)?, vec!["reminder", "escalation"]);
        Ok(())
    }

    #[test]
    fn test_refund_retry_bookkeeping() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        let now = Utc::now();
        let (cp, _) = db.create_checkpoint(&hold(order.id), now)?;
        db.auto_action_checkpoint(cp.id, now)?;
        let refund = db.pending_refunds()?.remove(0);

        db.mark_refund_failed(refund.id, "gateway 503")?;
        let failed = db.pending_refunds()?.remove(0);
        assert_eq!(failed.status, RefundStatus::Failed);
        assert_eq!(failed.attempts, 1);

        assert!(db.mark_refund_issued(refund.id, now)?);
        assert!(!db.mark_refund_issued(refund.id, now)?);
        assert!(db.pending_refunds()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_cancel_pending_checkpoints() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        let now = Utc::now();
        db.create_checkpoint(&hold(order.id), now)?;
        db.create_checkpoint(
            &NewCheckpoint {
                kind: CheckpointType::Cp1,
                phase: PhaseCode::AuthorityResearch,
                ..hold(order.id)
            },
            now,
        )?;
        assert_eq!(db.cancel_pending_checkpoints(order.id, now)?, 2);
        assert!(db.list_pending_checkpoints()?.is_empty());
        assert_eq!(db.cancel_pending_checkpoints(order.id, now)?, 0);
        Ok(())
    }
}
