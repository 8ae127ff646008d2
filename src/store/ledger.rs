use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use docket_common::PhaseCode;
use rusqlite::params;

use super::{DocketDb, LedgerEntry, fmt_ts, parse_enum, parse_ts};

impl DocketDb {
    /// Append a ledger row. Rows tied to a phase execution are written once
    /// per execution; a replay returns `false`.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_ledger_row(
        &self,
        order_id: i64,
        phase: PhaseCode,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        amount_nanos: i64,
        execution_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO cost_ledger (order_id, phase, model, input_tokens, output_tokens, amount_nanos, execution_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    order_id,
                    phase.as_str(),
                    model,
                    input_tokens,
                    output_tokens,
                    amount_nanos,
                    execution_id,
                    fmt_ts(now),
                ],
            )
            .context("Failed to insert ledger row")?;
        Ok(changed > 0)
    }

    /// Spend that counts toward caps: reset rows are always excluded.
    pub fn running_total(&self, order_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount_nanos), 0) FROM cost_ledger
                 WHERE order_id = ?1 AND is_rework_reset = 0",
                params![order_id],
                |row| row.get(0),
            )
            .context("Failed to sum ledger")
    }

    /// Every row including resets. Reporting only; never consulted by a cap.
    pub fn unfiltered_total(&self, order_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount_nanos), 0) FROM cost_ledger WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .context("Failed to sum ledger")
    }

    /// Flag every current row as a rework reset. Returns rows flagged.
    pub fn reset_ledger_for_rework(&self, order_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE cost_ledger SET is_rework_reset = 1 WHERE order_id = ?1 AND is_rework_reset = 0",
                params![order_id],
            )
            .context("Failed to reset ledger")
    }

    pub fn list_ledger(&self, order_id: i64) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, order_id, phase, model, input_tokens, output_tokens, amount_nanos, is_rework_reset, execution_id, created_at
                 FROM cost_ledger WHERE order_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_ledger")?;
        let rows = stmt
            .query_map(params![order_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, bool>(7)?,
                    row.get::<_, Option<i64>>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })
            .context("Failed to query ledger")?;
        let mut out = Vec::new();
        for row in rows {
            let (id, order_id, phase, model, input_tokens, output_tokens, amount_nanos, reset, execution_id, created_at) =
                row.context("Failed to read ledger row")?;
            out.push(LedgerEntry {
                id,
                order_id,
                phase: parse_enum(&phase, "ledger phase")?,
                model,
                input_tokens,
                output_tokens,
                amount_nanos,
                is_rework_reset: reset,
                execution_id,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(out)
    }
}
