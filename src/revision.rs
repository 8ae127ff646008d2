//! Revision loop and cost-cap exits.
//!
//! A failed quality gate sends the order back through revisions until the
//! loop limit; after that, or once spend reaches the tier cap, the order
//! goes straight to final assembly with a disclosure attached. Both exits
//! are single-fire store updates, so replaying a step is harmless.

use anyhow::Result;
use chrono::Utc;
use docket_common::PhaseCode;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::TierPolicy;
use crate::cost::CostTracker;
use crate::gateway::pricing::nanos_to_usd;
use crate::store::{DbHandle, DisclosureKind};

pub const MAX_REVISION_LOOPS: u32 = 3;

/// Where the order goes after a failed quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RevisionDecision {
    /// Run revisions again; `loop_number` is the loop now in progress.
    Revise { loop_number: u32 },
    /// Loop limit hit; skip to final assembly. `fired` is false when an
    /// earlier attempt already took the exit.
    LoopLimit { loops: u32, fired: bool },
}

impl RevisionDecision {
    pub fn next_phase(&self) -> PhaseCode {
        match self {
            Self::Revise { .. } => PhaseCode::Revisions,
            Self::LoopLimit { .. } => PhaseCode::FinalAssembly,
        }
    }
}

pub fn revision_limit_disclosure(loops: u32, grade: &str) -> String {
    format!(
        "This motion went through {} automated revision cycles without meeting the \
         quality threshold. The last automated grade was {}. Attorney review of the \
         argument sections is recommended before filing.",
        loops, grade
    )
}

pub fn cost_cap_disclosure(spent_nanos: i64, cap_usd: f64) -> String {
    format!(
        "Automated drafting stopped after reaching the ${:.2} processing budget \
         for this tier (${:.2} spent). Remaining refinement steps were skipped; \
         attorney review is recommended before filing.",
        cap_usd,
        nanos_to_usd(spent_nanos)
    )
}

#[derive(Clone)]
pub struct RevisionController {
    db: DbHandle,
    cost: CostTracker,
}

impl RevisionController {
    pub fn new(db: DbHandle, cost: CostTracker) -> Self {
        Self { db, cost }
    }

    /// Handle a failed judge simulation. `execution_id` is the failing
    /// gate execution; the same id never counts twice.
    pub async fn on_gate_failure(
        &self,
        order_id: i64,
        execution_id: i64,
        grade: &str,
    ) -> Result<RevisionDecision> {
        let grade = grade.to_string();
        let decision = self
            .db
            .call(move |db| {
                let counted = db.record_revision_loop(order_id, execution_id, &grade)?;
                let loops = db
                    .get_workflow(order_id)?
                    .map(|w| w.revision_loops)
                    .unwrap_or(0);
                if !counted {
                    info!(order_id, execution_id, "Gate failure already counted");
                }
                if loops >= MAX_REVISION_LOOPS {
                    let text = revision_limit_disclosure(loops, &grade);
                    let fired = db.fire_exit(
                        order_id,
                        DisclosureKind::RevisionLimit,
                        &text,
                        PhaseCode::FinalAssembly,
                        Utc::now(),
                    )?;
                    return Ok(RevisionDecision::LoopLimit { loops, fired });
                }
                db.set_current_phase(order_id, PhaseCode::Revisions)?;
                Ok(RevisionDecision::Revise { loop_number: loops })
            })
            .await?;

        match decision {
            RevisionDecision::LoopLimit { loops, fired: true } => {
                warn!(order_id, loops, "Revision limit reached, skipping to final assembly");
            }
            RevisionDecision::Revise { loop_number } => {
                info!(order_id, loop_number, "Quality gate failed, revising");
            }
            _ => {}
        }
        Ok(decision)
    }

    /// Take the cost-cap exit if spend has reached the tier cap. Returns
    /// whether the cap is reached; the exit itself fires at most once.
    pub async fn enforce_cost_cap(&self, order_id: i64, policy: &TierPolicy) -> Result<bool> {
        if !self.cost.cap_reached(order_id, policy).await? {
            return Ok(false);
        }
        let spent = self.cost.running_total(order_id).await?;
        let text = cost_cap_disclosure(spent, policy.cost_cap_usd);
        let fired = self
            .db
            .call(move |db| {
                db.fire_exit(
                    order_id,
                    DisclosureKind::CostCap,
                    &text,
                    PhaseCode::FinalAssembly,
                    Utc::now(),
                )
            })
            .await?;
        if fired {
            warn!(order_id, spent_usd = nanos_to_usd(spent), "Cost cap exit taken");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocketConfig;
    use crate::gateway::TokenUsage;
    use crate::store::test_support::sample_order;
    use docket_common::Tier;

    async fn setup() -> Result<(RevisionController, DbHandle, i64)> {
        let db = DbHandle::in_memory()?;
        let order_id = db
            .call(|db| {
                let order = db.create_order(&sample_order())?;
                db.ensure_workflow(order.id, PhaseCode::Intake)?;
                Ok(order.id)
            })
            .await?;
        let controller = RevisionController::new(db.clone(), CostTracker::new(db.clone()));
        Ok((controller, db, order_id))
    }

    #[tokio::test]
    async fn test_third_failure_takes_loop_exit_once() -> Result<()> {
        let (controller, db, order_id) = setup().await?;
        assert_eq!(
            controller.on_gate_failure(order_id, 10, "C+ (2.3)").await?,
            RevisionDecision::Revise { loop_number: 1 }
        );
        controller.on_gate_failure(order_id, 11, "B- (2.7)").await?;
        let third = controller.on_gate_failure(order_id, 12, "B (3.0)").await?;
        assert_eq!(third, RevisionDecision::LoopLimit { loops: 3, fired: true });
        assert_eq!(third.next_phase(), PhaseCode::FinalAssembly);

        // replayed step
        let replay = controller.on_gate_failure(order_id, 12, "B (3.0)").await?;
        assert_eq!(replay, RevisionDecision::LoopLimit { loops: 3, fired: false });

        let (wf, disclosures) = db
            .call(move |db| Ok((db.get_workflow(order_id)?, db.list_disclosures(order_id)?)))
            .await?;
        let wf = wf.unwrap();
        assert_eq!(wf.revision_loops, 3);
        assert_eq!(wf.current_phase, PhaseCode::FinalAssembly);
        assert_eq!(disclosures.len(), 1);
        assert!(disclosures[0].text.contains("3 automated revision cycles"));
        assert!(disclosures[0].text.contains("B (3.0)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_replayed_failure_does_not_double_count() -> Result<()> {
        let (controller, db, order_id) = setup().await?;
        controller.on_gate_failure(order_id, 5, "C").await?;
        let again = controller.on_gate_failure(order_id, 5, "C").await?;
        assert_eq!(again, RevisionDecision::Revise { loop_number: 1 });
        let wf = db.call(move |db| db.get_workflow(order_id)).await?.unwrap();
        assert_eq!(wf.revision_loops, 1);
        assert_eq!(wf.current_phase, PhaseCode::Revisions);
        Ok(())
    }

    #[tokio::test]
    async fn test_cost_cap_exit_is_idempotent() -> Result<()> {
        let (controller, db, order_id) = setup().await?;
        let config = DocketConfig::default();
        let policy = *config.tier_policy(Tier::C);
        assert!(!controller.enforce_cost_cap(order_id, &policy).await?);

        // 5M Sonnet output tokens is $75
        let usage = TokenUsage {
            model: "claude-sonnet-4-5".into(),
            input_tokens: 0,
            output_tokens: 5_000_000,
        };
        controller.cost.record(order_id, PhaseCode::Drafting, &usage, Some(1)).await?;

        assert!(controller.enforce_cost_cap(order_id, &policy).await?);
        assert!(controller.enforce_cost_cap(order_id, &policy).await?);
        let disclosures = db.call(move |db| db.list_disclosures(order_id)).await?;
        assert_eq!(disclosures.len(), 1);
        assert_eq!(disclosures[0].kind, DisclosureKind::CostCap);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_rows_do_not_count_toward_cap() -> Result<()> {
        let (controller, _db, order_id) = setup().await?;
        let policy = *DocketConfig::default().tier_policy(Tier::C);
        let usage = TokenUsage {
            model: "claude-sonnet-4-5".into(),
            input_tokens: 0,
            output_tokens: 6_000_000,
        };
        controller.cost.record(order_id, PhaseCode::Drafting, &usage, Some(1)).await?;
        controller.cost.reset_for_rework(order_id).await?;
        assert!(!controller.enforce_cost_cap(order_id, &policy).await?);
        Ok(())
    }
}
