//! Per-order AI spend.
//!
//! Every model call lands one row in the ledger. Totals are always read
//! back from the store; reset rows never count toward a cap.

use anyhow::Result;
use chrono::Utc;
use docket_common::PhaseCode;
use tracing::{debug, info};

use crate::config::TierPolicy;
use crate::gateway::TokenUsage;
use crate::gateway::pricing::{cost_nanos, nanos_to_usd};
use crate::store::DbHandle;

#[derive(Clone)]
pub struct CostTracker {
    db: DbHandle,
}

impl CostTracker {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Charge one call. When `execution_id` is set the row is written once
    /// per execution and a replay is free. Returns the amount charged by
    /// this call.
    pub async fn record(
        &self,
        order_id: i64,
        phase: PhaseCode,
        usage: &TokenUsage,
        execution_id: Option<i64>,
    ) -> Result<i64> {
        let amount = cost_nanos(&usage.model, usage.input_tokens, usage.output_tokens);
        let usage = usage.clone();
        let written = self
            .db
            .call(move |db| {
                db.insert_ledger_row(
                    order_id,
                    phase,
                    &usage.model,
                    usage.input_tokens,
                    usage.output_tokens,
                    amount,
                    execution_id,
                    Utc::now(),
                )
            })
            .await?;
        if !written {
            debug!(order_id, %phase, ?execution_id, "Ledger row already recorded");
            return Ok(0);
        }
        Ok(amount)
    }

    pub async fn running_total(&self, order_id: i64) -> Result<i64> {
        self.db.call(move |db| db.running_total(order_id)).await
    }

    /// Customer-requested rework starts with a fresh budget.
    pub async fn reset_for_rework(&self, order_id: i64) -> Result<usize> {
        let flagged = self
            .db
            .call(move |db| db.reset_ledger_for_rework(order_id))
            .await?;
        info!(order_id, rows = flagged, "Ledger reset for rework");
        Ok(flagged)
    }

    pub async fn cap_reached(&self, order_id: i64, policy: &TierPolicy) -> Result<bool> {
        let total = self.running_total(order_id).await?;
        let reached = total >= policy.cost_cap_nanos();
        if reached {
            info!(
                order_id,
                spent_usd = nanos_to_usd(total),
                cap_usd = policy.cost_cap_usd,
                "Cost cap reached"
            );
        }
        Ok(reached)
    }
}
