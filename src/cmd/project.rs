//! State directory setup: `docket init`.

use anyhow::{Context, Result};

use docket::config::DocketConfig;

use super::{config_path, open_db};
use crate::Cli;

pub fn cmd_init(cli: &Cli, config: &DocketConfig) -> Result<()> {
    std::fs::create_dir_all(&cli.state_dir).with_context(|| {
        format!("Failed to create state directory: {}", cli.state_dir.display())
    })?;

    let path = config_path(cli);
    if path.exists() {
        println!("Config already exists: {}", path.display());
    } else {
        DocketConfig::default().save(&path)?;
        println!("Created {}", path.display());
    }

    open_db(config)?;
    println!("Database ready: {}", config.store.path.display());
    Ok(())
}
