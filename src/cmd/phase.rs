//! Phase plan and dependency health: `docket phases`, `docket breakers`.

use std::sync::Arc;

use anyhow::{Context, Result};
use docket::config::DocketConfig;
use docket::phase::{RoutingTable, phases_for_order, skip_reason};
use docket::resilience::{BreakerState, ServiceRegistry};
use docket_common::{MotionType, Order, OrderStatus, PhaseCode, Tier};

use super::open_db;

/// Print every phase of the topology for a hypothetical order, with the
/// model route of the phases that run and the reason for those skipped.
pub fn cmd_phases(config: &DocketConfig, tier: &str, motion: &str, jurisdiction: &str) -> Result<()> {
    let order = Order {
        id: 0,
        tier: tier.parse::<Tier>()?,
        motion_type: motion.parse::<MotionType>()?,
        jurisdiction: jurisdiction.to_uppercase(),
        filing_deadline: None,
        status: OrderStatus::Submitted,
        customer_email: None,
        amount_paid_cents: 0,
        case_caption: String::new(),
        statement_of_facts: String::new(),
    };
    let routes = RoutingTable::from_config(&config.routing).context("Invalid routing table")?;
    let plan = phases_for_order(&order);
    let policy = config.tier_policy(order.tier);

    println!();
    println!(
        "{} tier {}, {}, {} ({} of {} phases)",
        console::style("Phase plan").bold().cyan(),
        order.tier,
        order.motion_type,
        order.jurisdiction,
        plan.len(),
        PhaseCode::ALL.len()
    );
    println!(
        "  quality threshold {:.1}, cost cap ${:.2}",
        policy.quality_threshold, policy.cost_cap_usd
    );
    println!();

    for phase in PhaseCode::ALL {
        if let Some(reason) = skip_reason(&order, phase) {
            println!(
                "  {:>6}  {:<28} {}",
                console::style(phase.as_str()).dim(),
                console::style(phase.name()).dim(),
                console::style(format!("skipped: {}", reason)).dim()
            );
            continue;
        }
        let route = routes.route(order.tier, phase);
        let thinking = route
            .thinking_budget
            .map(|b| format!("thinking {}", b))
            .unwrap_or_default();
        let marker = if phase.is_revision_only() {
            " (revision loop)"
        } else {
            ""
        };
        println!(
            "  {:>6}  {:<28} {:<5} {}{}",
            phase.as_str(),
            phase.name(),
            route.model,
            thinking,
            marker
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_breakers(config: &DocketConfig) -> Result<()> {
    let db = open_db(config)?;
    let registry = ServiceRegistry::new(config, Arc::new(db));

    println!();
    println!(
        "{:<12} {:<10} {:>8} {:>9}  {}",
        "DEPENDENCY", "STATE", "FAILURES", "SUCCESSES", "OPENED"
    );
    for (dependency, record) in registry.breaker_snapshots().await {
        match record {
            Ok(record) => {
                let state = match record.state {
                    BreakerState::Closed => console::style(record.state.as_str()).green(),
                    BreakerState::Open => console::style(record.state.as_str()).red(),
                    BreakerState::HalfOpen => console::style(record.state.as_str()).yellow(),
                };
                println!(
                    "{:<12} {:<10} {:>8} {:>9}  {}",
                    dependency.as_str(),
                    state,
                    record.failure_count,
                    record.success_count,
                    record
                        .opened_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Err(e) => {
                println!(
                    "{:<12} {}",
                    dependency.as_str(),
                    console::style(format!("unavailable: {:#}", e)).red()
                );
            }
        }
    }
    println!();
    Ok(())
}
