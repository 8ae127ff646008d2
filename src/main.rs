use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "docket")]
#[command(version, about = "Motion-drafting workflow engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// State directory holding docket.toml (and the database by default)
    #[arg(long, global = true, env = "DOCKET_STATE_DIR", default_value = ".docket")]
    pub state_dir: PathBuf,

    /// Database path. Overrides store.path and DOCKET_DB_PATH.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the state directory, a default docket.toml and the database
    Init,
    /// Create or inspect orders
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },
    /// Advance an order until it needs a human or closes
    Run {
        order_id: i64,
    },
    /// Walk pending checkpoints up the timeout ladder and retry refunds
    Tick,
    /// List or resolve checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Cancel an order and its pending checkpoints
    Cancel {
        order_id: i64,
    },
    /// Show the phase plan and model routes for an order profile
    Phases {
        #[arg(long, default_value = "B")]
        tier: String,
        #[arg(long, default_value = "summary_judgment")]
        motion: String,
        #[arg(long, default_value = "CA")]
        jurisdiction: String,
    },
    /// Show circuit breaker state per dependency
    Breakers,
    /// Citation utilities
    Citations {
        #[command(subcommand)]
        command: CitationCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum OrderCommands {
    /// Register an order (normally done by intake)
    Create {
        #[arg(long)]
        tier: String,
        #[arg(long)]
        motion: String,
        #[arg(long)]
        jurisdiction: String,
        #[arg(long)]
        caption: String,
        /// File containing the statement of facts
        #[arg(long)]
        facts: Option<PathBuf>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "0")]
        amount_cents: i64,
        /// Filing deadline, YYYY-MM-DD
        #[arg(long)]
        deadline: Option<String>,
    },
    /// Workflow, phase history, open checkpoints and spend
    Show {
        order_id: i64,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// Pending checkpoints, optionally for one order
    List {
        #[arg(long)]
        order: Option<i64>,
    },
    /// Answer a pending checkpoint
    Resolve {
        checkpoint_id: i64,
        #[arg(long)]
        by: String,
        #[arg(long, default_value = "approved")]
        resolution: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum CitationCommands {
    /// Print the citations found in a text file as JSON
    Extract { file: PathBuf },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default docket.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = cmd::load_config(&cli)?;
    let _log_guard = docket::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&cli, &config)?,
        Commands::Order { command } => cmd::cmd_order(&config, command.clone()).await?,
        Commands::Run { order_id } => cmd::cmd_run(config, *order_id).await?,
        Commands::Tick => cmd::cmd_tick(&config).await?,
        Commands::Checkpoint { command } => cmd::cmd_checkpoint(&config, command.clone()).await?,
        Commands::Cancel { order_id } => cmd::cmd_cancel(&config, *order_id).await?,
        Commands::Phases {
            tier,
            motion,
            jurisdiction,
        } => cmd::cmd_phases(&config, tier, motion, jurisdiction)?,
        Commands::Breakers => cmd::cmd_breakers(&config).await?,
        Commands::Citations { command } => cmd::cmd_citations(command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&cli, &config, command.clone())?,
    }

    Ok(())
}
