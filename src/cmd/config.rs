//! Configuration view and validation commands: `docket config`.

use anyhow::{Context, Result};
use docket::config::DocketConfig;
use docket::gateway::ModelTier;
use docket_common::Tier;

use super::super::ConfigCommands;
use super::config_path;
use crate::Cli;

pub fn cmd_config(cli: &Cli, config: &DocketConfig, command: Option<ConfigCommands>) -> Result<()> {
    let path = config_path(cli);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Docket Configuration");
            println!("====================");
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No docket.toml found at {} (using defaults)", path.display());
            }
            println!();

            println!("[store]");
            println!("  path = \"{}\"", config.store.path.display());
            println!("  lease_ttl_secs = {}", config.store.lease_ttl_secs);
            println!();

            println!("[models]");
            for tier in [ModelTier::Fast, ModelTier::Slow] {
                println!("  {} = \"{}\"", tier, config.models.model_for(tier));
            }
            let key_state = if std::env::var(&config.models.api_key_env).is_ok() {
                "set"
            } else {
                "missing"
            };
            println!("  api_key_env = \"{}\" ({})", config.models.api_key_env, key_state);
            println!();

            println!("[tiers]");
            for tier in Tier::ALL {
                let policy = config.tier_policy(tier);
                println!(
                    "  {}: threshold {:.1}  cost cap ${:.2}  batch {}  min composite {:.2}",
                    tier,
                    policy.quality_threshold,
                    policy.cost_cap_usd,
                    policy.batch_size,
                    policy.min_composite
                );
            }
            println!();

            println!("[holds]");
            println!("  reminder_hours = {}", config.holds.reminder_hours);
            println!("  escalation_hours = {}", config.holds.escalation_hours);
            println!("  final_notice_hours = {}", config.holds.final_notice_hours);
            println!("  hold_terminal_hours = {}", config.holds.hold_terminal_hours);
            println!("  cp3_terminal_hours = {}", config.holds.cp3_terminal_hours);
            println!();

            if !config.routing.overrides.is_empty() {
                println!("[routing.overrides]");
                for (key, route) in &config.routing.overrides {
                    println!(
                        "  \"{}\" = {} (thinking {})",
                        key,
                        route.model.as_str(),
                        route
                            .thinking_budget
                            .map(|b| b.to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate()?;
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", console::style(warning).yellow());
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("docket.toml already exists at {}", path.display());
                return Ok(());
            }
            std::fs::create_dir_all(&cli.state_dir).with_context(|| {
                format!("Failed to create state directory: {}", cli.state_dir.display())
            })?;
            DocketConfig::default().save(&path)?;
            println!("Created {}", path.display());
        }
    }

    Ok(())
}
