//! Batch verification of an order's pending claims.
//!
//! Claims are verified in tier-sized batches; claims inside a batch run
//! concurrently. Each result is written as soon as its batch finishes, so a
//! crash mid-run loses at most one batch and a replay only re-verifies what
//! is still pending.

use std::sync::Arc;
use std::time::Duration;

use docket_common::{Order, PhaseCode, Tier};
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::authority::{authority_flag, authority_score};
use super::bad_law::{LawStatus, check_bad_law};
use super::dicta::assess_dicta;
use super::existence::{ExistenceOutcome, check_existence};
use super::flags::{StepReport, compile};
use super::holding::{HoldingOutcome, HoldingResult, current_year, is_high_stakes, verify_holding};
use super::judge::StepModels;
use super::quote::check_quote;
use super::types::{CitationKind, Claim, ClaimVerification, FlagKind, Verdict};
use super::CaseLawLookup;
use crate::config::{DocketConfig, TiersConfig};
use crate::cost::CostTracker;
use crate::errors::PipelineError;
use crate::gateway::{ModelGateway, TokenUsage};
use crate::resilience::ServiceRegistry;
use crate::store::DbHandle;

/// Counts for one `verify_pending` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub batches: usize,
    pub verified: usize,
    pub needs_review: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Results written by this run, by claim id.
    pub results: Vec<(i64, ClaimVerification)>,
}

impl BatchReport {
    fn tally(&mut self, claim_id: i64, result: ClaimVerification) {
        match result.verdict {
            Verdict::Verified | Verdict::VerifiedWithNotes => self.verified += 1,
            Verdict::NeedsReview => self.needs_review += 1,
            Verdict::Failed => self.failed += 1,
            Verdict::Deferred => self.deferred += 1,
        }
        self.results.push((claim_id, result));
    }
}

pub struct CitationPipeline {
    db: DbHandle,
    lookup: Arc<dyn CaseLawLookup>,
    models: StepModels,
    costs: CostTracker,
    tiers: TiersConfig,
    lookup_timeout: Duration,
}

impl CitationPipeline {
    pub fn new(
        db: DbHandle,
        registry: Arc<ServiceRegistry>,
        gateway: Arc<dyn ModelGateway>,
        lookup: Arc<dyn CaseLawLookup>,
        config: &DocketConfig,
    ) -> Self {
        Self {
            costs: CostTracker::new(db.clone()),
            db,
            lookup,
            models: StepModels::new(registry, gateway, config.models.clone()),
            tiers: config.tiers.clone(),
            lookup_timeout: config.case_law.timeout(),
        }
    }

    /// Run steps 1-7 for one claim. Never fails: an unavailable dependency
    /// yields a deferred verdict.
    pub async fn verify_claim(
        &self,
        claim: &Claim,
        origin: PhaseCode,
        tier: Tier,
    ) -> (ClaimVerification, Vec<TokenUsage>) {
        let min_composite = self.tiers.policy(tier).min_composite;
        let mut report = StepReport::default();
        let mut usage = Vec::new();

        let existence = check_existence(
            self.models.registry(),
            self.lookup.as_ref(),
            &claim.citation,
            self.lookup_timeout,
        )
        .await;
        report.scores.existence = existence.score();
        let record = match existence {
            ExistenceOutcome::Found(record) => record,
            ExistenceOutcome::NotFound => {
                report.flag(FlagKind::NotFound, format!("no match for {}", claim.citation.raw));
                return (compile(report, origin, min_composite), usage);
            }
            ExistenceOutcome::ApiError(error) => {
                report.unavailable("existence", error);
                return (compile(report, origin, min_composite), usage);
            }
        };
        report.source_id = Some(record.source_id.clone());

        let year = current_year();
        // Holding, dicta and subsequent history are questions about
        // opinions; statutes skip them.
        if claim.citation.kind != CitationKind::Statute {
            let high_stakes = is_high_stakes(claim, tier, record.treatment, year);
            let (holding, dicta, bad_law) = tokio::join!(
                verify_holding(&self.models, claim, &record, high_stakes),
                assess_dicta(&self.models, claim, &record),
                check_bad_law(&self.models, claim, &record),
            );

            match holding {
                Ok(outcome) => {
                    usage.extend(outcome.usage.iter().cloned());
                    report.scores.holding = Some(outcome.score);
                    report.second_stage = outcome.second_stage.is_some();
                    let kind = match outcome.result {
                        HoldingResult::Pass => None,
                        HoldingResult::PassWithNotes => Some(FlagKind::HoldingPartialMatch),
                        HoldingResult::NeedsReview => Some(FlagKind::HoldingNeedsReview),
                        HoldingResult::Fail => Some(FlagKind::HoldingMismatch),
                    };
                    if let Some(kind) = kind {
                        report.flag(kind, holding_detail(&outcome));
                    }
                }
                Err(e) => report.unavailable("holding", e),
            }

            match dicta {
                Ok((assessment, spent)) => {
                    usage.push(spent);
                    report.scores.dicta_risk = Some(assessment.risk);
                    if assessment.is_dicta() {
                        report.flag(FlagKind::DictaAsHolding, assessment.reasoning);
                    }
                }
                Err(e) => report.unavailable("dicta", e),
            }

            match bad_law {
                Ok((assessment, spent)) => {
                    usage.push(spent);
                    report.scores.bad_law = Some(assessment.status.score());
                    if assessment.status.is_bad_law() {
                        report.flag(
                            FlagKind::BadLaw,
                            format!("{}: {}", assessment.status, assessment.reasoning),
                        );
                    } else if assessment.status == LawStatus::Questioned {
                        report.flag(FlagKind::QuestionedTreatment, assessment.reasoning);
                    }
                }
                Err(e) => report.unavailable("bad_law", e),
            }
        }

        if let Some(quoted) = claim.quoted_text.as_deref() {
            match record.text.clone() {
                Some(source) => {
                    let quoted = quoted.to_string();
                    match tokio::task::spawn_blocking(move || check_quote(&quoted, &source)).await {
                        Ok(check) => {
                            report.scores.quote = Some(check.similarity);
                            if let Some(flag) = check.flag() {
                                report.flags.push(flag);
                            }
                        }
                        Err(e) => report.unavailable("quote", e),
                    }
                }
                None => report.flag(FlagKind::QuoteUnverifiable, "no source text to compare"),
            }
        }

        let authority = authority_score(&claim.citation, year);
        report.scores.authority = Some(authority);
        if let Some(flag) = authority_flag(authority) {
            report.flags.push(flag);
        }

        (compile(report, origin, min_composite), usage)
    }

    /// Verify every pending claim of `order`, recording results as
    /// `phase`/`loop_number`. Checks `cancel` between batches.
    pub async fn verify_pending(
        &self,
        order: &Order,
        phase: PhaseCode,
        loop_number: u32,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        let order_id = order.id;
        let pending = self.db.call(move |db| db.pending_claims(order_id)).await?;
        let batch_size = self.tiers.policy(order.tier).batch_size.max(1);
        let mut report = BatchReport::default();

        info!(order_id, %phase, pending = pending.len(), batch_size, "Verifying claims");

        for batch in pending.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled { order_id });
            }
            report.batches += 1;

            let results = join_all(
                batch
                    .iter()
                    .map(|stored| self.verify_claim(&stored.claim, stored.origin_phase, order.tier)),
            )
            .await;

            for (stored, (result, usage)) in batch.iter().zip(results) {
                for spent in &usage {
                    self.costs.record(order_id, phase, spent, None).await?;
                }
                let claim_id = stored.id;
                let to_save = result.clone();
                let written = self
                    .db
                    .call(move |db| db.save_verification(claim_id, phase, loop_number, &to_save))
                    .await?;
                if written {
                    report.tally(claim_id, result);
                } else {
                    warn!(order_id, claim_id, "Claim already verified, result dropped");
                }
            }
        }

        info!(
            order_id,
            %phase,
            verified = report.verified,
            needs_review = report.needs_review,
            failed = report.failed,
            deferred = report.deferred,
            "Verification pass complete"
        );
        Ok(report)
    }
}

fn holding_detail(outcome: &HoldingOutcome) -> String {
    let mut detail = format!("first stage {:.2}", outcome.first_stage.confidence);
    if let Some(second) = &outcome.second_stage {
        let verb = if second.approve { "approved" } else { "rejected" };
        detail.push_str(&format!(", second stage {} at {:.2}", verb, second.confidence));
    }
    detail
}
