//! Wiring: one store, one service registry, and the controllers that
//! share them.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::caselaw::CourtListenerLookup;
use crate::checkpoint::{CheckpointController, LoggingRefundGateway, Notifier, RefundGateway, TracingNotifier};
use crate::citation::CaseLawLookup;
use crate::config::DocketConfig;
use crate::executor::{ActiveRuns, PhaseExecutor};
use crate::gateway::{AnthropicGateway, ModelGateway};
use crate::resilience::ServiceRegistry;
use crate::store::DbHandle;

/// External collaborators. Production uses the HTTP clients and the
/// logging notifier/refund gateway; tests swap in fakes.
pub struct Collaborators {
    pub gateway: Arc<dyn ModelGateway>,
    pub lookup: Arc<dyn CaseLawLookup>,
    pub notifier: Arc<dyn Notifier>,
    pub refunds: Arc<dyn RefundGateway>,
}

impl Collaborators {
    pub fn from_config(config: &DocketConfig) -> Result<Self> {
        let gateway = AnthropicGateway::from_config(&config.models)
            .context("Failed to build model gateway")?;
        let lookup = CourtListenerLookup::from_config(&config.case_law)
            .context("Failed to build case-law client")?;
        Ok(Self {
            gateway: Arc::new(gateway),
            lookup: Arc::new(lookup),
            notifier: Arc::new(TracingNotifier),
            refunds: Arc::new(LoggingRefundGateway),
        })
    }
}

pub struct Engine {
    pub db: DbHandle,
    pub config: Arc<DocketConfig>,
    pub registry: Arc<ServiceRegistry>,
    pub executor: PhaseExecutor,
    pub checkpoints: Arc<CheckpointController>,
}

impl Engine {
    pub fn new(config: DocketConfig, db: DbHandle, collaborators: Collaborators) -> Result<Self> {
        for warning in config.validate().context("Invalid configuration")? {
            warn!("{}", warning);
        }
        let config = Arc::new(config);
        let registry = Arc::new(ServiceRegistry::new(&config, Arc::new(db.clone())));
        let runs = ActiveRuns::new();
        let checkpoints = Arc::new(CheckpointController::new(
            db.clone(),
            collaborators.notifier,
            collaborators.refunds,
            config.holds.clone(),
            runs.clone(),
        ));
        let executor = PhaseExecutor::new(
            db.clone(),
            config.clone(),
            registry.clone(),
            collaborators.gateway,
            collaborators.lookup,
            checkpoints.clone(),
            runs,
        )?;
        Ok(Self {
            db,
            config,
            registry,
            executor,
            checkpoints,
        })
    }
}
