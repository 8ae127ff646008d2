//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module       | Commands handled                         |
//! |--------------|-------------------------------------------|
//! | `project`    | `Init`                                   |
//! | `order`      | `Order create`, `Order show`             |
//! | `run`        | `Run`, `Tick`, `Cancel`                  |
//! | `checkpoint` | `Checkpoint list`, `Checkpoint resolve`  |
//! | `phase`      | `Phases`, `Breakers`                     |
//! | `citations`  | `Citations extract`                      |
//! | `config`     | `Config`                                 |

pub mod checkpoint;
pub mod citations;
pub mod config;
pub mod order;
pub mod phase;
pub mod project;
pub mod run;

pub use checkpoint::cmd_checkpoint;
pub use citations::cmd_citations;
pub use config::cmd_config;
pub use order::cmd_order;
pub use phase::{cmd_breakers, cmd_phases};
pub use project::cmd_init;
pub use run::{cmd_cancel, cmd_run, cmd_tick};

use std::sync::Arc;

use anyhow::Result;
use docket::checkpoint::{CheckpointController, LoggingRefundGateway, TracingNotifier};
use docket::config::{CONFIG_FILE, DocketConfig, StoreConfig};
use docket::executor::ActiveRuns;
use docket::store::DbHandle;

use crate::Cli;

/// File, then environment, then CLI flags.
pub fn load_config(cli: &Cli) -> Result<DocketConfig> {
    let mut config = DocketConfig::load_or_default(&cli.state_dir)?;
    if config.store.path == StoreConfig::default().path {
        config.store.path = cli.state_dir.join("docket.db");
    }
    config.apply_env();
    if let Some(db) = &cli.db {
        config.store.path = db.clone();
    }
    Ok(config)
}

pub fn config_path(cli: &Cli) -> std::path::PathBuf {
    cli.state_dir.join(CONFIG_FILE)
}

pub fn open_db(config: &DocketConfig) -> Result<DbHandle> {
    DbHandle::open(&config.store.path)
}

/// Checkpoint controller for one-shot commands that never call a model.
pub fn checkpoint_controller(config: &DocketConfig, db: DbHandle) -> CheckpointController {
    CheckpointController::new(
        db,
        Arc::new(TracingNotifier),
        Arc::new(LoggingRefundGateway),
        config.holds.clone(),
        ActiveRuns::new(),
    )
}
