//! Pipeline execution commands: `docket run`, `docket tick`, `docket cancel`.

use anyhow::Result;
use docket::config::DocketConfig;
use docket::engine::{Collaborators, Engine};
use docket::executor::RunOutcome;
use tracing::info;

use super::{checkpoint_controller, open_db};

pub async fn cmd_run(config: DocketConfig, order_id: i64) -> Result<()> {
    let db = open_db(&config)?;
    let collaborators = Collaborators::from_config(&config)?;
    let engine = Engine::new(config, db, collaborators)?;

    info!(order_id, "Running order");
    let outcome = engine.executor.run_order(order_id).await?;

    match &outcome {
        RunOutcome::AwaitingCheckpoint {
            checkpoint_id,
            kind,
            phase,
        } => {
            println!(
                "{} Order {} paused at {} ({}): checkpoint #{}",
                console::style("⏸").yellow(),
                order_id,
                kind,
                phase,
                checkpoint_id
            );
            println!(
                "  Resolve with: docket checkpoint resolve {} --by <reviewer>",
                checkpoint_id
            );
        }
        RunOutcome::Completed => {
            println!(
                "{} Order {} completed",
                console::style("✓").green().bold(),
                order_id
            );
        }
        RunOutcome::Closed { status } => {
            println!(
                "{} Order {} is closed ({})",
                console::style("✗").red(),
                order_id,
                status.as_str()
            );
        }
    }
    Ok(())
}

pub async fn cmd_tick(config: &DocketConfig) -> Result<()> {
    let db = open_db(config)?;
    let controller = checkpoint_controller(config, db);

    let report = controller.tick().await?;
    let retried = controller.retry_pending_refunds().await?;

    println!(
        "Examined {} pending checkpoint(s): {} notice(s) sent, {} auto-actioned, {} refund(s) issued",
        report.examined,
        report.notices_sent,
        report.auto_actioned.len(),
        report.refunds_issued + retried
    );
    for id in &report.auto_actioned {
        println!(
            "  {} checkpoint #{} timed out",
            console::style("!").yellow().bold(),
            id
        );
    }
    Ok(())
}

pub async fn cmd_cancel(config: &DocketConfig, order_id: i64) -> Result<()> {
    let db = open_db(config)?;
    let controller = checkpoint_controller(config, db);

    if controller.cancel_order(order_id).await? {
        println!("Order {} cancelled", order_id);
    } else {
        println!("Order {} was already closed", order_id);
    }
    Ok(())
}
