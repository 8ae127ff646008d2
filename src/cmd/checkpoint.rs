//! Human checkpoint commands: `docket checkpoint`.

use anyhow::Result;
use chrono::Utc;
use docket::checkpoint::ResolveOutcome;
use docket::config::DocketConfig;
use docket_common::CheckpointState;

use super::super::CheckpointCommands;
use super::{checkpoint_controller, open_db};

pub async fn cmd_checkpoint(config: &DocketConfig, command: CheckpointCommands) -> Result<()> {
    let db = open_db(config)?;
    match command {
        CheckpointCommands::List { order } => {
            let checkpoints = db
                .call(move |db| match order {
                    Some(order_id) => Ok(db
                        .list_checkpoints(order_id)?
                        .into_iter()
                        .filter(|cp| cp.state == CheckpointState::Pending)
                        .collect()),
                    None => db.list_pending_checkpoints(),
                })
                .await?;
            if checkpoints.is_empty() {
                println!("No pending checkpoints.");
                return Ok(());
            }

            let controller = checkpoint_controller(config, db);
            let now = Utc::now();
            println!();
            println!(
                "{:>5}  {:>6}  {:<5} {:<6} {:>7}  {}",
                "ID", "ORDER", "TYPE", "PHASE", "AGE", "NEXT"
            );
            for cp in &checkpoints {
                let age = now - cp.created_at;
                let next = match controller.next_action(cp, now) {
                    Some((stage, at)) => {
                        format!("{} at {}", stage, at.format("%Y-%m-%d %H:%M UTC"))
                    }
                    None => "-".to_string(),
                };
                println!(
                    "{:>5}  {:>6}  {:<5} {:<6} {:>6}h  {}",
                    cp.id,
                    cp.order_id,
                    cp.kind,
                    cp.phase.as_str(),
                    age.num_hours(),
                    next
                );
                println!("       {}", console::style(&cp.reason).dim());
            }
            println!();
        }
        CheckpointCommands::Resolve {
            checkpoint_id,
            by,
            resolution,
        } => {
            let controller = checkpoint_controller(config, db);
            match controller.resolve(checkpoint_id, &by, &resolution).await? {
                ResolveOutcome::Resume(phase) => {
                    println!(
                        "{} Checkpoint #{} resolved; order resumes at {} ({})",
                        console::style("✓").green().bold(),
                        checkpoint_id,
                        phase,
                        phase.name()
                    );
                }
                ResolveOutcome::Completed => {
                    println!(
                        "{} Checkpoint #{} signed off; order completed",
                        console::style("✓").green().bold(),
                        checkpoint_id
                    );
                }
                ResolveOutcome::AlreadyClosed => {
                    println!("Checkpoint #{} is no longer pending", checkpoint_id);
                }
            }
        }
    }
    Ok(())
}
