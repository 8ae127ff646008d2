//! Phase executor: drives one order through its phase plan.
//!
//! `run_order` is the job-queue entry point. It takes the per-order lease,
//! then loops: reload order and workflow, run the phase under the pointer,
//! move the pointer. It returns when a checkpoint is raised, the order is
//! closed, or a dependency fails (the pointer stays put, so the next
//! invocation retries the same phase).

pub mod input;
pub mod output;
pub mod runs;

use std::sync::Arc;

use chrono::Utc;
use docket_common::{
    CheckpointState, CheckpointType, Order, OrderStatus, PhaseCode, PhaseStatus, WorkflowStatus,
};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use input::{PhaseInput, build_phase_input};
pub use output::{Grade, PhaseOutput};
pub use runs::ActiveRuns;

use crate::checkpoint::CheckpointController;
use crate::citation::{CaseLawLookup, CitationPipeline};
use crate::config::DocketConfig;
use crate::cost::CostTracker;
use crate::errors::PipelineError;
use crate::gateway::{ModelGateway, ModelRequest};
use crate::phase::{RoutingTable, phases_for_order, successor};
use crate::protocols::ProtocolOrchestrator;
use crate::resilience::ServiceRegistry;
use crate::revision::RevisionController;
use crate::store::{Checkpoint, DbHandle, Disclosure, NewPhaseExecution, PhaseExecution, Workflow};

/// Upper bound on phase steps in one `run_order` call. Three revision
/// loops over the full plan stay well below it.
const MAX_STEPS_PER_RUN: usize = 64;

/// How a `run_order` call ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Stopped at a checkpoint that needs a human answer.
    AwaitingCheckpoint {
        checkpoint_id: i64,
        kind: CheckpointType,
        phase: PhaseCode,
    },
    /// CP3 signed off; nothing left to run.
    Completed,
    /// Cancelled or refunded before or during the run.
    Closed { status: OrderStatus },
}

impl RunOutcome {
    fn awaiting(checkpoint: &Checkpoint) -> Self {
        Self::AwaitingCheckpoint {
            checkpoint_id: checkpoint.id,
            kind: checkpoint.kind,
            phase: checkpoint.phase,
        }
    }
}

/// What one phase step asks the run loop to do next.
enum Step {
    /// Move the pointer to this phase.
    Advance(PhaseCode),
    /// The pointer was already moved (revision loop or exit).
    Moved,
    /// A checkpoint was raised.
    Paused(Checkpoint),
}

pub struct PhaseExecutor {
    db: DbHandle,
    config: Arc<DocketConfig>,
    routing: RoutingTable,
    registry: Arc<ServiceRegistry>,
    gateway: Arc<dyn ModelGateway>,
    citations: CitationPipeline,
    checkpoints: Arc<CheckpointController>,
    revisions: RevisionController,
    costs: CostTracker,
    runs: ActiveRuns,
    worker_id: String,
}

impl PhaseExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DbHandle,
        config: Arc<DocketConfig>,
        registry: Arc<ServiceRegistry>,
        gateway: Arc<dyn ModelGateway>,
        lookup: Arc<dyn CaseLawLookup>,
        checkpoints: Arc<CheckpointController>,
        runs: ActiveRuns,
    ) -> anyhow::Result<Self> {
        let routing = RoutingTable::from_config(&config.routing)?;
        let costs = CostTracker::new(db.clone());
        Ok(Self {
            citations: CitationPipeline::new(
                db.clone(),
                registry.clone(),
                gateway.clone(),
                lookup,
                &config,
            ),
            revisions: RevisionController::new(db.clone(), costs.clone()),
            costs,
            routing,
            registry,
            gateway,
            checkpoints,
            runs,
            config,
            db,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
        })
    }

    /// Advance `order_id` as far as it can go without a human. Safe to
    /// invoke repeatedly: a second worker is turned away by the lease and
    /// a replayed step is absorbed by the store's single-fire writes.
    pub async fn run_order(&self, order_id: i64) -> Result<RunOutcome, PipelineError> {
        let holder = self.worker_id.clone();
        let ttl = self.config.store.lease_ttl();
        let acquired = self
            .db
            .call(move |db| {
                if db.get_order(order_id)?.is_none() {
                    return Ok(None);
                }
                Ok(Some(db.acquire_lease(order_id, &holder, Utc::now(), ttl)?))
            })
            .await?
            .ok_or(PipelineError::OrderNotFound { id: order_id })?;
        if !acquired {
            return Err(PipelineError::LeaseHeld { order_id });
        }

        let cancel = self.runs.register(order_id);
        let result = self.drive(order_id, &cancel).await;
        self.runs.finish(order_id);

        let holder = self.worker_id.clone();
        if let Err(e) = self
            .db
            .call(move |db| db.release_lease(order_id, &holder))
            .await
        {
            warn!(order_id, error = %e, "Failed to release order lease");
        }

        match &result {
            Ok(outcome) => info!(order_id, ?outcome, "Run finished"),
            Err(e) => warn!(order_id, error = %e, "Run stopped"),
        }
        result
    }

    async fn drive(
        &self,
        order_id: i64,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        for _ in 0..MAX_STEPS_PER_RUN {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { order_id });
            }

            let (order, workflow, open) = self
                .db
                .call(move |db| {
                    let order = db.get_order(order_id)?;
                    let workflow = db.ensure_workflow(order_id, PhaseCode::Intake)?;
                    let open: Vec<Checkpoint> = db
                        .list_checkpoints(order_id)?
                        .into_iter()
                        .filter(|c| c.state == CheckpointState::Pending)
                        .collect();
                    Ok((order, workflow, open))
                })
                .await?;
            let order = order.ok_or(PipelineError::OrderNotFound { id: order_id })?;

            if order.status == OrderStatus::Completed || workflow.status == WorkflowStatus::Completed {
                return Ok(RunOutcome::Completed);
            }
            if order.status.is_final() || workflow.status == WorkflowStatus::Cancelled {
                return Ok(RunOutcome::Closed {
                    status: order.status,
                });
            }
            if let Some(checkpoint) = open.first() {
                return Ok(RunOutcome::awaiting(checkpoint));
            }

            let plan = phases_for_order(&order);
            let phase = workflow.current_phase;

            if !plan.contains(&phase) && !phase.is_revision_only() {
                let next = successor(&plan, phase, None).unwrap_or(PhaseCode::FinalAssembly);
                debug!(order_id, %phase, %next, "Pointer on a skipped phase, advancing");
                self.move_pointer(order_id, next).await?;
                continue;
            }

            if phase != PhaseCode::FinalAssembly {
                let policy = *self.config.tier_policy(order.tier);
                if self.revisions.enforce_cost_cap(order_id, &policy).await? {
                    self.move_pointer(order_id, PhaseCode::FinalAssembly).await?;
                    continue;
                }
            }

            match self.step(&order, &workflow, &plan, phase, cancel).await? {
                Step::Advance(next) => self.move_pointer(order_id, next).await?,
                Step::Moved => {}
                Step::Paused(checkpoint) => return Ok(RunOutcome::awaiting(&checkpoint)),
            }
        }
        Err(PipelineError::PhaseFailed {
            phase: PhaseCode::FinalAssembly,
            message: format!("no checkpoint reached within {} steps", MAX_STEPS_PER_RUN),
        })
    }

    async fn move_pointer(&self, order_id: i64, next: PhaseCode) -> Result<(), PipelineError> {
        self.db
            .call(move |db| db.set_current_phase(order_id, next))
            .await?;
        Ok(())
    }

    async fn step(
        &self,
        order: &Order,
        workflow: &Workflow,
        plan: &[PhaseCode],
        phase: PhaseCode,
        cancel: &CancellationToken,
    ) -> Result<Step, PipelineError> {
        let order_id = order.id;
        self.db
            .call(move |db| {
                db.set_workflow_status(order_id, WorkflowStatus::InProgress)?;
                db.set_order_status(order_id, OrderStatus::InProgress)?;
                Ok(())
            })
            .await?;
        info!(order_id, %phase, loop_number = workflow.revision_loops, "Running phase");

        if phase.verifies_claims() {
            return self.verify_phase(order, workflow, plan, phase, cancel).await;
        }

        let (prior, checkpoints, disclosures) = self
            .db
            .call(move |db| {
                Ok((
                    db.list_phase_executions(order_id)?,
                    db.list_checkpoints(order_id)?,
                    db.list_disclosures(order_id)?,
                ))
            })
            .await?;
        let (execution, output) = self
            .invoke_phase(order, workflow.revision_loops, phase, &prior, &checkpoints, &disclosures)
            .await?;

        match phase {
            PhaseCode::EvidenceStrategy => {
                if let Some(reason) = output.hold_request() {
                    let checkpoint = self
                        .checkpoints
                        .create(order_id, CheckpointType::Hold, phase, Some(phase), &reason)
                        .await?;
                    return Ok(Step::Paused(checkpoint));
                }
            }
            PhaseCode::AuthorityResearch => {
                let added = self
                    .store_claims(order_id, phase, workflow.revision_loops, &output)
                    .await?;
                let reason = format!("Review {} research citation(s) before drafting", added);
                let checkpoint = self
                    .checkpoints
                    .create(order_id, CheckpointType::Cp1, phase, Some(PhaseCode::Drafting), &reason)
                    .await?;
                return Ok(Step::Paused(checkpoint));
            }
            PhaseCode::Drafting | PhaseCode::Revisions => {
                self.store_claims(order_id, phase, workflow.revision_loops, &output)
                    .await?;
            }
            PhaseCode::JudgeSimulation => {
                let threshold = self.config.tier_policy(order.tier).quality_threshold;
                let grade = output.grade();
                if let Some(grade) = grade.as_ref().filter(|g| g.passes(threshold)) {
                    info!(order_id, grade = %grade.label(), threshold, "Quality gate passed");
                } else {
                    let label = grade.map(|g| g.label()).unwrap_or_else(|| "ungraded".to_string());
                    warn!(order_id, grade = %label, threshold, "Quality gate failed");
                    self.revisions
                        .on_gate_failure(order_id, execution.id, &label)
                        .await?;
                    return Ok(Step::Moved);
                }
            }
            PhaseCode::FinalAssembly => {
                let body = assemble_deliverable(&output, &prior, &disclosures);
                self.db
                    .call(move |db| db.save_deliverable(order_id, &body, Utc::now()))
                    .await?;
                let checkpoint = self
                    .checkpoints
                    .create(
                        order_id,
                        CheckpointType::Cp3,
                        phase,
                        None,
                        "Final deliverable ready for attorney sign-off",
                    )
                    .await?;
                return Ok(Step::Paused(checkpoint));
            }
            _ => {}
        }

        let next = successor(plan, phase, output.recommendation()).unwrap_or(PhaseCode::FinalAssembly);
        Ok(Step::Advance(next))
    }

    /// Route, prompt, call and record one model phase. A failed call is
    /// recorded as a failed attempt and surfaced as a dependency error.
    async fn invoke_phase(
        &self,
        order: &Order,
        loop_number: u32,
        phase: PhaseCode,
        prior: &[PhaseExecution],
        checkpoints: &[Checkpoint],
        disclosures: &[Disclosure],
    ) -> Result<(PhaseExecution, PhaseOutput), PipelineError> {
        let order_id = order.id;
        let route = self.routing.route(order.tier, phase);
        let model = self.config.models.model_for(route.model).to_string();
        let input = build_phase_input(order, phase, loop_number, prior, checkpoints, disclosures);
        let request = ModelRequest::new(route.model, &model, input.system, input.prompt)
            .with_thinking_budget(route.thinking_budget)
            .with_schema(input.schema);

        let gateway = &self.gateway;
        let result = self
            .registry
            .call_with_retry(route.model.dependency(), self.config.models.request_timeout(), || {
                let request = &request;
                async move { gateway.invoke(request).await.map_err(anyhow::Error::from) }
            })
            .await;

        let mut record = NewPhaseExecution {
            order_id,
            phase,
            loop_number,
            status: PhaseStatus::Completed,
            model: Some(model),
            model_tier: Some(route.model),
            thinking_budget: route.thinking_budget,
            input_tokens: 0,
            output_tokens: 0,
            output: serde_json::Value::Null,
            error: None,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                record.status = PhaseStatus::Failed;
                record.error = Some(e.to_string());
                if let Err(store_err) = self
                    .db
                    .call(move |db| db.insert_phase_execution(&record, Utc::now()))
                    .await
                {
                    warn!(order_id, %phase, error = %store_err, "Could not record failed attempt");
                }
                return Err(e.into());
            }
        };

        let output = PhaseOutput::parse(&response.text);
        if !output.structured {
            warn!(order_id, %phase, "Phase answer was not JSON, keeping raw text");
        }
        record.input_tokens = response.input_tokens;
        record.output_tokens = response.output_tokens;
        record.output = output.value.clone();
        let execution = self
            .db
            .call(move |db| db.insert_phase_execution(&record, Utc::now()))
            .await?;
        self.costs
            .record(order_id, phase, &response.usage(), Some(execution.id))
            .await?;
        Ok((execution, output))
    }

    async fn store_claims(
        &self,
        order_id: i64,
        phase: PhaseCode,
        loop_number: u32,
        output: &PhaseOutput,
    ) -> Result<usize, PipelineError> {
        let claims = output.claims();
        let found = claims.len();
        let added = self
            .db
            .call(move |db| {
                let added = db.insert_claims(order_id, phase, loop_number, &claims)?;
                db.add_claim_count(order_id, added as u32)?;
                Ok(added)
            })
            .await?;
        info!(order_id, %phase, found, added, "Claims recorded");
        Ok(added)
    }

    /// Verify pending claims, then let the protocols decide whether the
    /// order may continue. Pause and Block raise CP2.
    async fn verify_phase(
        &self,
        order: &Order,
        workflow: &Workflow,
        plan: &[PhaseCode],
        phase: PhaseCode,
        cancel: &CancellationToken,
    ) -> Result<Step, PipelineError> {
        let order_id = order.id;
        let loop_number = workflow.revision_loops;
        let report = self
            .citations
            .verify_pending(order, phase, loop_number, cancel)
            .await?;

        let verifications: Vec<_> = self
            .db
            .call(move |db| db.claims_verified_in(order_id, phase, loop_number))
            .await?
            .iter()
            .filter_map(|c| c.verification())
            .collect();
        let outcome = ProtocolOrchestrator::evaluate(&verifications, self.config.tier_policy(order.tier));
        if report.deferred > 0 {
            warn!(order_id, %phase, deferred = report.deferred, "Claims deferred until lookup recovers");
        }

        let record = NewPhaseExecution {
            order_id,
            phase,
            loop_number,
            status: if outcome.decision.halts() {
                PhaseStatus::Blocked
            } else {
                PhaseStatus::Completed
            },
            model: None,
            model_tier: None,
            thinking_budget: None,
            input_tokens: 0,
            output_tokens: 0,
            output: json!({
                "batches": report.batches,
                "verified": report.verified,
                "needs_review": report.needs_review,
                "failed": report.failed,
                "deferred": report.deferred,
                "decision": outcome.decision.as_str(),
                "protocols": outcome.triggered,
            }),
            error: None,
        };
        self.db
            .call(move |db| db.insert_phase_execution(&record, Utc::now()))
            .await?;

        let next = successor(plan, phase, None).unwrap_or(PhaseCode::FinalAssembly);
        if outcome.decision.halts() {
            warn!(order_id, %phase, decision = %outcome.decision, "Verification halted the order");
            let checkpoint = self
                .checkpoints
                .create(order_id, CheckpointType::Cp2, phase, Some(next), &outcome.summary())
                .await?;
            return Ok(Step::Paused(checkpoint));
        }
        if !outcome.triggered.is_empty() {
            warn!(order_id, %phase, summary = %outcome.summary(), "Verification flagged claims");
        }
        Ok(Step::Advance(next))
    }
}

/// Deliverable body: the assembled document, or the latest draft when the
/// final phase returned none, followed by any disclosures it left out.
pub fn assemble_deliverable(
    output: &PhaseOutput,
    prior: &[PhaseExecution],
    disclosures: &[Disclosure],
) -> String {
    let latest_draft = || {
        prior
            .iter()
            .rev()
            .filter(|e| {
                e.status == PhaseStatus::Completed
                    && matches!(e.phase, PhaseCode::Drafting | PhaseCode::Revisions)
            })
            .find_map(|e| {
                PhaseOutput {
                    value: e.output.clone(),
                    structured: true,
                }
                .document_text()
                .map(str::to_string)
            })
    };
    let mut body = output
        .document_text()
        .map(str::to_string)
        .or_else(latest_draft)
        .unwrap_or_default();

    let missing: Vec<&Disclosure> = disclosures
        .iter()
        .filter(|d| !body.contains(d.text.as_str()))
        .collect();
    if !missing.is_empty() {
        body.push_str("\n\n---\n\nDISCLOSURES\n");
        for disclosure in missing {
            body.push_str("\n- ");
            body.push_str(&disclosure.text);
        }
        body.push('\n');
    }
    body
}
