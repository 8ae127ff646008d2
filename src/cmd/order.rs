//! Order registration and status: `docket order`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use docket::config::DocketConfig;
use docket::gateway::pricing::nanos_to_usd;
use docket::store::{NewOrder, StatusReport};
use docket_common::{MotionType, PhaseCode, Tier};

use super::super::OrderCommands;
use super::open_db;

pub async fn cmd_order(config: &DocketConfig, command: OrderCommands) -> Result<()> {
    let db = open_db(config)?;
    match command {
        OrderCommands::Create {
            tier,
            motion,
            jurisdiction,
            caption,
            facts,
            email,
            amount_cents,
            deadline,
        } => {
            let statement_of_facts = match facts {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read facts file: {}", path.display()))?,
                None => String::new(),
            };
            let filing_deadline = deadline
                .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
                .transpose()
                .context("Deadline must be YYYY-MM-DD")?;
            let new = NewOrder {
                tier: tier.parse::<Tier>()?,
                motion_type: motion.parse::<MotionType>()?,
                jurisdiction,
                filing_deadline,
                customer_email: email,
                amount_paid_cents: amount_cents,
                case_caption: caption,
                statement_of_facts,
            };
            let order = db
                .call(move |db| {
                    let order = db.create_order(&new)?;
                    db.ensure_workflow(order.id, PhaseCode::Intake)?;
                    Ok(order)
                })
                .await?;
            println!("{}", order.id);
        }
        OrderCommands::Show { order_id, json } => {
            let report = db
                .call(move |db| db.status_report(order_id))
                .await?
                .with_context(|| format!("Order {} not found", order_id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    let order = &report.order;
    println!();
    println!(
        "{} {}",
        console::style(format!("Order {}", order.id)).bold().cyan(),
        order.case_caption
    );
    println!(
        "  tier {}  motion {}  jurisdiction {}  status {}",
        order.tier,
        order.motion_type,
        order.jurisdiction,
        order.status.as_str()
    );
    if let Some(wf) = &report.workflow {
        println!(
            "  phase {} ({})  workflow {}  revision loops {}  claims {}",
            wf.current_phase,
            wf.current_phase.name(),
            wf.status.as_str(),
            wf.revision_loops,
            wf.claim_count
        );
        if let Some(grade) = &wf.last_grade {
            println!("  last grade {}", grade);
        }
    }
    println!(
        "  spend ${:.4} (${:.4} including reset rows)",
        nanos_to_usd(report.spend_nanos),
        nanos_to_usd(report.spend_nanos_unfiltered)
    );

    if !report.executions.is_empty() {
        println!();
        println!("{}", console::style("Phase history").bold());
        for e in &report.executions {
            let status = match e.error.as_deref() {
                Some(err) => format!("{} {}", e.status.as_str(), console::style(err).red()),
                None => e.status.as_str().to_string(),
            };
            println!(
                "  {:>6}  attempt {}  loop {}  {}  {}",
                e.phase.as_str(),
                e.attempt,
                e.loop_number,
                e.model.as_deref().unwrap_or("-"),
                status
            );
        }
    }

    if !report.claim_counts.is_empty() {
        println!();
        println!("{}", console::style("Claims").bold());
        for (status, count) in &report.claim_counts {
            println!("  {:<24} {}", status, count);
        }
    }

    if !report.open_checkpoints.is_empty() {
        println!();
        println!("{}", console::style("Open checkpoints").bold().yellow());
        for cp in &report.open_checkpoints {
            println!("  #{} {} at {}  {}", cp.id, cp.kind, cp.phase, cp.reason);
        }
    }

    for d in &report.disclosures {
        println!();
        println!("{} {}", console::style("Disclosure:").yellow(), d.text);
    }
    println!();
}
