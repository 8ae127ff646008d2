//! Fixed phase topology, skip rules and model routing.
//!
//! This module provides:
//! - `SKIP_RULES`: declarative predicates that drop phases for an order
//! - `phases_for_order`: the active plan, filtered once per run
//! - `next_phase`: forward advance with an optional model recommendation
//! - `successor`: `next_phase` plus the revision path
//! - `RoutingTable`: typed (tier, phase) → model tier + reasoning budget

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use docket_common::{MotionType, Order, PhaseCode, Tier};
use serde::{Deserialize, Serialize};

use crate::config::RoutingConfig;
use crate::gateway::ModelTier;

/// A condition over order attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Tier is at or below the given tier.
    TierAtMost(Tier),
    /// Motion is not MSJ/MSA.
    NotSummaryMotion,
    /// Motion type is one of these.
    MotionTypeIn(&'static [MotionType]),
    /// Jurisdiction code differs (case-insensitive).
    JurisdictionIsNot(&'static str),
}

impl Condition {
    pub fn holds(&self, order: &Order) -> bool {
        match self {
            Self::TierAtMost(tier) => order.tier <= *tier,
            Self::NotSummaryMotion => !order.motion_type.is_summary_motion(),
            Self::MotionTypeIn(types) => types.contains(&order.motion_type),
            Self::JurisdictionIsNot(code) => !order.jurisdiction.eq_ignore_ascii_case(code),
        }
    }
}

/// Skip `phase` whenever `when` holds.
#[derive(Debug, Clone, Copy)]
pub struct SkipRule {
    pub phase: PhaseCode,
    pub when: Condition,
    pub reason: &'static str,
}

pub const SKIP_RULES: &[SkipRule] = &[
    SkipRule {
        phase: PhaseCode::OppositionAnticipation,
        when: Condition::TierAtMost(Tier::A),
        reason: "tier A procedural motions",
    },
    SkipRule {
        phase: PhaseCode::OppositionAnticipation,
        when: Condition::MotionTypeIn(&[MotionType::Continuance]),
        reason: "continuance requests",
    },
    SkipRule {
        phase: PhaseCode::SeparateStatementCheck,
        when: Condition::NotSummaryMotion,
        reason: "only MSJ/MSA motions carry a separate statement",
    },
    SkipRule {
        phase: PhaseCode::SeparateStatementCheck,
        when: Condition::JurisdictionIsNot("CA"),
        reason: "separate statements are a California requirement",
    },
    SkipRule {
        phase: PhaseCode::SupportingDocuments,
        when: Condition::MotionTypeIn(&[MotionType::Continuance]),
        reason: "continuance requests need no declarations",
    },
];

/// The active phase plan for an order: the fixed topology minus skipped
/// phases, in topology order.
pub fn phases_for_order(order: &Order) -> Vec<PhaseCode> {
    PhaseCode::ALL
        .iter()
        .copied()
        .filter(|phase| skip_reason(order, *phase).is_none())
        .collect()
}

/// The first matching skip reason for a phase, if any.
pub fn skip_reason(order: &Order, phase: PhaseCode) -> Option<&'static str> {
    SKIP_RULES
        .iter()
        .find(|rule| rule.phase == phase && rule.when.holds(order))
        .map(|rule| rule.reason)
}

/// Next phase along the forward path.
///
/// A recommendation is honoured only when it names a later phase of the
/// plan that is not revision-only; otherwise advance linearly, jumping
/// over revision-only phases.
pub fn next_phase(
    plan: &[PhaseCode],
    current: PhaseCode,
    recommendation: Option<PhaseCode>,
) -> Option<PhaseCode> {
    if let Some(recommended) = recommendation {
        if recommended > current && !recommended.is_revision_only() && plan.contains(&recommended) {
            return Some(recommended);
        }
    }
    plan.iter()
        .copied()
        .find(|p| *p > current && !p.is_revision_only())
}

/// Next phase after `current` completes. Revision-only phases walk the
/// revision path `VIII -> VII.1 -> VII`; everything else goes through
/// `next_phase`.
pub fn successor(
    plan: &[PhaseCode],
    current: PhaseCode,
    recommendation: Option<PhaseCode>,
) -> Option<PhaseCode> {
    match current {
        PhaseCode::Revisions if plan.contains(&PhaseCode::PostRevisionCitationCheck) => {
            Some(PhaseCode::PostRevisionCitationCheck)
        }
        PhaseCode::Revisions | PhaseCode::PostRevisionCitationCheck => {
            Some(PhaseCode::JudgeSimulation)
        }
        _ => next_phase(plan, current, recommendation),
    }
}

/// Model selection for one (tier, phase) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub model: ModelTier,
    /// Extended-reasoning token allowance; `None` disables it.
    pub thinking_budget: Option<u32>,
}

const MIN_THINKING_BUDGET: u32 = 1024;
const MAX_THINKING_BUDGET: u32 = 64_000;

fn default_route(tier: Tier, phase: PhaseCode) -> Route {
    use PhaseCode::*;

    let model = match phase {
        Intake | CitationCheck | PostRevisionCitationCheck | CaptionValidation
        | SeparateStatementCheck => ModelTier::Fast,
        LegalStandards | EvidenceStrategy | SupportingDocuments => {
            if tier >= Tier::C {
                ModelTier::Slow
            } else {
                ModelTier::Fast
            }
        }
        Drafting | JudgeSimulation => ModelTier::Slow,
        AuthorityResearch | OppositionAnticipation | Revisions | FinalAssembly => {
            if tier >= Tier::B {
                ModelTier::Slow
            } else {
                ModelTier::Fast
            }
        }
    };

    let thinking_budget = match (tier, phase) {
        (Tier::D, Drafting | OppositionAnticipation | JudgeSimulation | Revisions) => Some(16_000),
        (Tier::C, JudgeSimulation) => Some(10_000),
        (Tier::C, OppositionAnticipation) => Some(8_000),
        _ => None,
    };

    Route {
        model,
        thinking_budget,
    }
}

/// Typed routing table covering every (tier, phase) pair.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<(Tier, PhaseCode), Route>,
}

impl RoutingTable {
    /// Built-in routes with config overrides applied. Fails on malformed
    /// override keys, out-of-range budgets, or any missing pair.
    pub fn from_config(config: &RoutingConfig) -> Result<Self> {
        let mut routes = HashMap::new();
        for tier in Tier::ALL {
            for phase in PhaseCode::ALL {
                routes.insert((tier, phase), default_route(tier, phase));
            }
        }

        for (key, over) in &config.overrides {
            let (tier, phase) = parse_route_key(key)?;
            routes.insert(
                (tier, phase),
                Route {
                    model: over.model,
                    thinking_budget: over.thinking_budget,
                },
            );
        }

        let table = Self { routes };
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<()> {
        for tier in Tier::ALL {
            for phase in PhaseCode::ALL {
                let route = self
                    .routes
                    .get(&(tier, phase))
                    .with_context(|| format!("No route for tier {} phase {}", tier, phase))?;
                if let Some(budget) = route.thinking_budget {
                    if !(MIN_THINKING_BUDGET..=MAX_THINKING_BUDGET).contains(&budget) {
                        bail!(
                            "Thinking budget {} for {}:{} outside {}-{}",
                            budget,
                            tier,
                            phase,
                            MIN_THINKING_BUDGET,
                            MAX_THINKING_BUDGET
                        );
                    }
                }
            }
        }
        Ok(())
    }

    pub fn route(&self, tier: Tier, phase: PhaseCode) -> Route {
        // validate() guarantees presence; fall back to the built-in route
        // rather than panicking if that invariant is ever broken.
        self.routes
            .get(&(tier, phase))
            .copied()
            .unwrap_or_else(|| default_route(tier, phase))
    }
}

fn parse_route_key(key: &str) -> Result<(Tier, PhaseCode)> {
    let (tier, phase) = key
        .split_once(':')
        .with_context(|| format!("Routing key '{}' must look like '<tier>:<phase>'", key))?;
    let tier: Tier = tier.parse().with_context(|| format!("Routing key '{}'", key))?;
    let phase: PhaseCode = phase.parse().with_context(|| format!("Routing key '{}'", key))?;
    Ok((tier, phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteOverride;
    use docket_common::OrderStatus;

    fn order(tier: Tier, motion_type: MotionType, jurisdiction: &str) -> Order {
        Order {
            id: 1,
            tier,
            motion_type,
            jurisdiction: jurisdiction.to_string(),
            filing_deadline: None,
            status: OrderStatus::Submitted,
            customer_email: None,
            amount_paid_cents: 0,
            case_caption: String::new(),
            statement_of_facts: String::new(),
        }
    }

    #[test]
    fn california_msj_runs_every_phase() {
        let plan = phases_for_order(&order(Tier::C, MotionType::SummaryJudgment, "CA"));
        assert_eq!(plan, PhaseCode::ALL.to_vec());
    }

    #[test]
    fn tier_a_skips_opposition_anticipation() {
        let plan = phases_for_order(&order(Tier::A, MotionType::Compel, "LA"));
        assert!(!plan.contains(&PhaseCode::OppositionAnticipation));
        assert!(!plan.contains(&PhaseCode::SeparateStatementCheck));
        assert!(plan.contains(&PhaseCode::JudgeSimulation));
    }

    #[test]
    fn separate_statement_requires_california() {
        let o = order(Tier::B, MotionType::SummaryJudgment, "FED");
        assert_eq!(
            skip_reason(&o, PhaseCode::SeparateStatementCheck),
            Some("separate statements are a California requirement")
        );
    }

    #[test]
    fn plan_is_subsequence_of_topology() {
        let o = order(Tier::A, MotionType::Continuance, "TX");
        let plan = phases_for_order(&o);
        assert!(plan.windows(2).all(|w| w[0] < w[1]));
        assert!(plan.iter().all(|p| PhaseCode::ALL.contains(p)));
        assert_eq!(plan, phases_for_order(&o));
    }

    #[test]
    fn passing_judge_simulation_jumps_revision_phases() {
        let plan = PhaseCode::ALL.to_vec();
        assert_eq!(
            next_phase(&plan, PhaseCode::JudgeSimulation, None),
            Some(PhaseCode::CaptionValidation)
        );
    }

    #[test]
    fn backward_recommendation_is_ignored() {
        let plan = PhaseCode::ALL.to_vec();
        assert_eq!(
            next_phase(&plan, PhaseCode::Drafting, Some(PhaseCode::Intake)),
            Some(PhaseCode::CitationCheck)
        );
    }

    #[test]
    fn forward_recommendation_within_plan_is_honoured() {
        let plan = PhaseCode::ALL.to_vec();
        assert_eq!(
            next_phase(&plan, PhaseCode::Drafting, Some(PhaseCode::OppositionAnticipation)),
            Some(PhaseCode::OppositionAnticipation)
        );
    }

    #[test]
    fn recommendation_outside_plan_falls_back_to_linear() {
        let plan = phases_for_order(&order(Tier::A, MotionType::Compel, "CA"));
        assert_eq!(
            next_phase(&plan, PhaseCode::CitationCheck, Some(PhaseCode::OppositionAnticipation)),
            Some(PhaseCode::JudgeSimulation)
        );
    }

    #[test]
    fn revision_path_returns_to_judge_simulation() {
        let plan = PhaseCode::ALL.to_vec();
        assert_eq!(
            successor(&plan, PhaseCode::Revisions, Some(PhaseCode::FinalAssembly)),
            Some(PhaseCode::PostRevisionCitationCheck)
        );
        assert_eq!(
            successor(&plan, PhaseCode::PostRevisionCitationCheck, None),
            Some(PhaseCode::JudgeSimulation)
        );
        assert_eq!(
            successor(&plan, PhaseCode::JudgeSimulation, None),
            Some(PhaseCode::CaptionValidation)
        );
    }

    #[test]
    fn final_assembly_has_no_successor() {
        let plan = PhaseCode::ALL.to_vec();
        assert_eq!(next_phase(&plan, PhaseCode::FinalAssembly, None), None);
    }

    #[test]
    fn default_table_covers_every_pair() {
        let table = RoutingTable::from_config(&RoutingConfig::default()).unwrap();
        assert_eq!(table.route(Tier::A, PhaseCode::Intake).model, ModelTier::Fast);
        assert_eq!(table.route(Tier::D, PhaseCode::JudgeSimulation).thinking_budget, Some(16_000));
        assert_eq!(table.route(Tier::B, PhaseCode::JudgeSimulation).thinking_budget, None);
    }

    #[test]
    fn override_replaces_single_entry() {
        let mut config = RoutingConfig::default();
        config.overrides.insert(
            "A:IV".to_string(),
            RouteOverride {
                model: ModelTier::Slow,
                thinking_budget: Some(4000),
            },
        );
        let table = RoutingTable::from_config(&config).unwrap();
        assert_eq!(
            table.route(Tier::A, PhaseCode::AuthorityResearch),
            Route {
                model: ModelTier::Slow,
                thinking_budget: Some(4000)
            }
        );
        assert_eq!(table.route(Tier::B, PhaseCode::Intake).model, ModelTier::Fast);
    }

    #[test]
    fn tiny_thinking_budget_is_rejected() {
        let mut config = RoutingConfig::default();
        config.overrides.insert(
            "B:V".to_string(),
            RouteOverride {
                model: ModelTier::Slow,
                thinking_budget: Some(10),
            },
        );
        assert!(RoutingTable::from_config(&config).is_err());
    }
}
