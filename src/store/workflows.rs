use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use docket_common::{CheckpointState, PhaseCode, WorkflowStatus};
use rusqlite::{OptionalExtension, params};

use super::{
    Disclosure, DisclosureKind, DocketDb, NewPhaseExecution, PhaseExecution, StatusReport,
    Workflow, fmt_ts, parse_enum, parse_ts,
};

struct WorkflowRow {
    order_id: i64,
    current_phase: String,
    revision_loops: u32,
    claim_count: u32,
    status: String,
    protocol10_triggered: bool,
    cost_cap_triggered: bool,
    last_grade: Option<String>,
    last_loop_execution_id: Option<i64>,
}

impl WorkflowRow {
    fn into_workflow(self) -> Result<Workflow> {
        Ok(Workflow {
            order_id: self.order_id,
            current_phase: parse_enum(&self.current_phase, "workflow phase")?,
            revision_loops: self.revision_loops,
            claim_count: self.claim_count,
            status: parse_enum(&self.status, "workflow status")?,
            protocol10_triggered: self.protocol10_triggered,
            cost_cap_triggered: self.cost_cap_triggered,
            last_grade: self.last_grade,
            last_loop_execution_id: self.last_loop_execution_id,
        })
    }
}

struct PhaseExecutionRow {
    id: i64,
    order_id: i64,
    phase: String,
    attempt: u32,
    loop_number: u32,
    status: String,
    model: Option<String>,
    model_tier: Option<String>,
    thinking_budget: Option<u32>,
    input_tokens: u32,
    output_tokens: u32,
    output: String,
    error: Option<String>,
    created_at: String,
}

impl PhaseExecutionRow {
    fn into_execution(self) -> Result<PhaseExecution> {
        let model_tier = match self.model_tier.as_deref() {
            Some("fast") => Some(crate::gateway::ModelTier::Fast),
            Some("slow") => Some(crate::gateway::ModelTier::Slow),
            Some(other) => anyhow::bail!("Invalid model tier: {}", other),
            None => None,
        };
        Ok(PhaseExecution {
            id: self.id,
            order_id: self.order_id,
            phase: parse_enum(&self.phase, "execution phase")?,
            attempt: self.attempt,
            loop_number: self.loop_number,
            status: parse_enum(&self.status, "execution status")?,
            model: self.model,
            model_tier,
            thinking_budget: self.thinking_budget,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            output: serde_json::from_str(&self.output)
                .context("Failed to parse phase output JSON")?,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

const WORKFLOW_COLUMNS: &str = "order_id, current_phase, revision_loops, claim_count, status, protocol10_triggered, cost_cap_triggered, last_grade, last_loop_execution_id";

impl DocketDb {
    // ── Workflows ─────────────────────────────────────────────────────

    /// Create the workflow row if it does not exist yet; returns the row.
    pub fn ensure_workflow(&self, order_id: i64, first_phase: PhaseCode) -> Result<Workflow> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO workflows (order_id, current_phase) VALUES (?1, ?2)",
                params![order_id, first_phase.as_str()],
            )
            .context("Failed to insert workflow")?;
        self.get_workflow(order_id)?
            .context("Workflow not found after insert")
    }

    pub fn get_workflow(&self, order_id: i64) -> Result<Option<Workflow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM workflows WHERE order_id = ?1", WORKFLOW_COLUMNS),
                params![order_id],
                |row| {
                    Ok(WorkflowRow {
                        order_id: row.get(0)?,
                        current_phase: row.get(1)?,
                        revision_loops: row.get(2)?,
                        claim_count: row.get(3)?,
                        status: row.get(4)?,
                        protocol10_triggered: row.get(5)?,
                        cost_cap_triggered: row.get(6)?,
                        last_grade: row.get(7)?,
                        last_loop_execution_id: row.get(8)?,
                    })
                },
            )
            .optional()
            .context("Failed to query workflow")?;
        row.map(WorkflowRow::into_workflow).transpose()
    }

    pub fn set_current_phase(&self, order_id: i64, phase: PhaseCode) -> Result<()> {
        self.conn
            .execute(
                "UPDATE workflows SET current_phase = ?1, updated_at = datetime('now') WHERE order_id = ?2",
                params![phase.as_str(), order_id],
            )
            .context("Failed to update workflow phase")?;
        Ok(())
    }

    /// Set the workflow status unless it is already final.
    pub fn set_workflow_status(&self, order_id: i64, status: WorkflowStatus) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE workflows SET status = ?1, updated_at = datetime('now')
                 WHERE order_id = ?2 AND status NOT IN ('completed', 'cancelled')",
                params![status.as_str(), order_id],
            )
            .context("Failed to update workflow status")?;
        Ok(changed > 0)
    }

    pub fn set_last_grade(&self, order_id: i64, grade: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE workflows SET last_grade = ?1 WHERE order_id = ?2",
                params![grade, order_id],
            )
            .context("Failed to record grade")?;
        Ok(())
    }

    pub fn add_claim_count(&self, order_id: i64, added: u32) -> Result<()> {
        self.conn
            .execute(
                "UPDATE workflows SET claim_count = claim_count + ?1 WHERE order_id = ?2",
                params![added, order_id],
            )
            .context("Failed to update claim count")?;
        Ok(())
    }

    /// Count one revision loop for the quality-gate execution
    /// `execution_id`. Any replay of an execution already counted, recent
    /// or not, is a no-op. Returns whether the counter moved.
    pub fn record_revision_loop(&self, order_id: i64, execution_id: i64, grade: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin revision loop transaction")?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO revision_loops (order_id, execution_id, grade) VALUES (?1, ?2, ?3)",
                params![order_id, execution_id, grade],
            )
            .context("Failed to record revision loop")?;
        if inserted == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE workflows
             SET revision_loops = revision_loops + 1, last_loop_execution_id = ?2, last_grade = ?3,
                 updated_at = datetime('now')
             WHERE order_id = ?1",
            params![order_id, execution_id, grade],
        )
        .context("Failed to count revision loop")?;
        tx.commit().context("Failed to commit revision loop")?;
        Ok(true)
    }

    /// Fire a single-fire exit: set the guard flag for `kind`, move the
    /// pointer to `jump_to` and append the disclosure, all in one
    /// transaction. Returns `false` (and changes nothing) when the flag
    /// was already set.
    pub fn fire_exit(
        &self,
        order_id: i64,
        kind: DisclosureKind,
        text: &str,
        jump_to: PhaseCode,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let flag = match kind {
            DisclosureKind::RevisionLimit => "protocol10_triggered",
            DisclosureKind::CostCap => "cost_cap_triggered",
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin exit transaction")?;
        let changed = tx
            .execute(
                &format!(
                    "UPDATE workflows SET {flag} = 1, current_phase = ?1, updated_at = datetime('now')
                     WHERE order_id = ?2 AND {flag} = 0"
                ),
                params![jump_to.as_str(), order_id],
            )
            .with_context(|| format!("Failed to set {}", flag))?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "INSERT OR IGNORE INTO disclosures (order_id, kind, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![order_id, kind.as_str(), text, fmt_ts(now)],
        )
        .context("Failed to insert disclosure")?;
        tx.commit().context("Failed to commit exit")?;
        Ok(true)
    }

    pub fn list_disclosures(&self, order_id: i64) -> Result<Vec<Disclosure>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, order_id, kind, text, created_at FROM disclosures
                 WHERE order_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_disclosures")?;
        let rows = stmt
            .query_map(params![order_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query disclosures")?;
        let mut out = Vec::new();
        for row in rows {
            let (id, order_id, kind, text, created_at) =
                row.context("Failed to read disclosure row")?;
            out.push(Disclosure {
                id,
                order_id,
                kind: parse_enum(&kind, "disclosure kind")?,
                text,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(out)
    }

    // ── Phase executions ──────────────────────────────────────────────

    pub fn insert_phase_execution(
        &self,
        new: &NewPhaseExecution,
        now: DateTime<Utc>,
    ) -> Result<PhaseExecution> {
        let attempt: u32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) + 1 FROM phase_executions WHERE order_id = ?1 AND phase = ?2",
                params![new.order_id, new.phase.as_str()],
                |row| row.get(0),
            )
            .context("Failed to count phase attempts")?;
        let output = serde_json::to_string(&new.output).context("Failed to serialize output")?;
        self.conn
            .execute(
                "INSERT INTO phase_executions (order_id, phase, attempt, loop_number, status, model, model_tier, thinking_budget, input_tokens, output_tokens, output, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    new.order_id,
                    new.phase.as_str(),
                    attempt,
                    new.loop_number,
                    new.status.as_str(),
                    new.model,
                    new.model_tier.map(|t| t.as_str()),
                    new.thinking_budget,
                    new.input_tokens,
                    new.output_tokens,
                    output,
                    new.error,
                    fmt_ts(now),
                ],
            )
            .context("Failed to insert phase execution")?;
        let id = self.conn.last_insert_rowid();
        self.list_phase_executions(new.order_id)?
            .into_iter()
            .find(|e| e.id == id)
            .context("Phase execution not found after insert")
    }

    /// All executions for an order in execution order.
    pub fn list_phase_executions(&self, order_id: i64) -> Result<Vec<PhaseExecution>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, order_id, phase, attempt, loop_number, status, model, model_tier, thinking_budget, input_tokens, output_tokens, output, error, created_at
                 FROM phase_executions WHERE order_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_phase_executions")?;
        let rows = stmt
            .query_map(params![order_id], |row| {
                Ok(PhaseExecutionRow {
                    id: row.get(0)?,
                    order_id: row.get(1)?,
                    phase: row.get(2)?,
                    attempt: row.get(3)?,
                    loop_number: row.get(4)?,
                    status: row.get(5)?,
                    model: row.get(6)?,
                    model_tier: row.get(7)?,
                    thinking_budget: row.get(8)?,
                    input_tokens: row.get(9)?,
                    output_tokens: row.get(10)?,
                    output: row.get(11)?,
                    error: row.get(12)?,
                    created_at: row.get(13)?,
                })
            })
            .context("Failed to query phase executions")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read phase execution row")?.into_execution()?);
        }
        Ok(out)
    }

    // ── Reporting ─────────────────────────────────────────────────────

    pub fn status_report(&self, order_id: i64) -> Result<Option<StatusReport>> {
        let Some(order) = self.get_order(order_id)? else {
            return Ok(None);
        };
        let open_checkpoints = self
            .list_checkpoints(order_id)?
            .into_iter()
            .filter(|c| c.state == CheckpointState::Pending)
            .collect();
        let mut stmt = self
            .conn
            .prepare(
                "SELECT COALESCE(status, 'pending'), COUNT(*) FROM claims
                 WHERE order_id = ?1 GROUP BY 1 ORDER BY 1",
            )
            .context("Failed to prepare claim counts")?;
        let claim_counts = stmt
            .query_map(params![order_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to query claim counts")?
            .collect::<rusqlite::Result<Vec<(String, i64)>>>()
            .context("Failed to read claim counts")?;

        Ok(Some(StatusReport {
            workflow: self.get_workflow(order_id)?,
            executions: self.list_phase_executions(order_id)?,
            open_checkpoints,
            disclosures: self.list_disclosures(order_id)?,
            spend_nanos: self.running_total(order_id)?,
            spend_nanos_unfiltered: self.unfiltered_total(order_id)?,
            claim_counts,
            order,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::db_with_order;
    use docket_common::{PhaseStatus, Tier};

    fn execution(order_id: i64, phase: PhaseCode) -> NewPhaseExecution {
        NewPhaseExecution {
            order_id,
            phase,
            loop_number: 0,
            status: PhaseStatus::Completed,
            model: Some("claude-haiku-4-5".into()),
            model_tier: Some(crate::gateway::ModelTier::Fast),
            thinking_budget: None,
            input_tokens: 100,
            output_tokens: 50,
            output: serde_json::json!({"summary": "ok"}),
            error: None,
        }
    }

    #[test]
    fn test_ensure_workflow_is_idempotent() -> Result<()> {
        let (db, order) = db_with_order(Tier::B);
        let first = db.ensure_workflow(order.id, PhaseCode::Intake)?;
        db.set_current_phase(order.id, PhaseCode::Drafting)?;
        let second = db.ensure_workflow(order.id, PhaseCode::Intake)?;
        assert_eq!(first.status, WorkflowStatus::Pending);
        assert_eq!(second.current_phase, PhaseCode::Drafting);
        Ok(())
    }

    #[test]
    fn test_revision_loop_counts_each_execution_once() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        db.ensure_workflow(order.id, PhaseCode::Intake)?;
        assert!(db.record_revision_loop(order.id, 10, "C+")?);
        assert!(!db.record_revision_loop(order.id, 10, "C+")?);
        assert!(db.record_revision_loop(order.id, 11, "B-")?);
        // A late replay of the older execution is still ignored.
        assert!(!db.record_revision_loop(order.id, 10, "C+")?);
        let wf = db.get_workflow(order.id)?.unwrap();
        assert_eq!(wf.revision_loops, 2);
        assert_eq!(wf.last_grade.as_deref(), Some("B-"));
        Ok(())
    }

    #[test]
    fn test_exit_fires_once_with_one_disclosure() -> Result<()> {
        let (db, order) = db_with_order(Tier::C);
        db.ensure_workflow(order.id, PhaseCode::JudgeSimulation)?;
        let now = Utc::now();
        assert!(db.fire_exit(order.id, DisclosureKind::CostCap, "cap", PhaseCode::FinalAssembly, now)?);
        assert!(!db.fire_exit(order.id, DisclosureKind::CostCap, "cap", PhaseCode::FinalAssembly, now)?);
        // The other exit has its own guard.
        assert!(db.fire_exit(
            order.id,
            DisclosureKind::RevisionLimit,
            "loops",
            PhaseCode::FinalAssembly,
            now
        )?);
        let disclosures = db.list_disclosures(order.id)?;
        assert_eq!(disclosures.len(), 2);
        let wf = db.get_workflow(order.id)?.unwrap();
        assert!(wf.cost_cap_triggered && wf.protocol10_triggered);
        assert_eq!(wf.current_phase, PhaseCode::FinalAssembly);
        Ok(())
    }

    #[test]
    fn test_phase_attempts_increment_per_phase() -> Result<()> {
        let (db, order) = db_with_order(Tier::A);
        let now = Utc::now();
        let a = db.insert_phase_execution(&execution(order.id, PhaseCode::Intake), now)?;
        let b = db.insert_phase_execution(&execution(order.id, PhaseCode::Intake), now)?;
        let c = db.insert_phase_execution(&execution(order.id, PhaseCode::LegalStandards), now)?;
        assert_eq!((a.attempt, b.attempt, c.attempt), (1, 2, 1));
        assert_eq!(b.output["summary"], "ok");
        assert_eq!(db.list_phase_executions(order.id)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_final_workflow_status_is_sticky() -> Result<()> {
        let (db, order) = db_with_order(Tier::A);
        db.ensure_workflow(order.id, PhaseCode::Intake)?;
        assert!(db.set_workflow_status(order.id, WorkflowStatus::Cancelled)?);
        assert!(!db.set_workflow_status(order.id, WorkflowStatus::InProgress)?);
        Ok(())
    }
}
