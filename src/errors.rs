//! Typed error hierarchy for the docket engine.
//!
//! Two top-level enums cover the places where callers branch on the cause:
//! - `DependencyError`: guarded calls to external dependencies (model
//!   providers, case-law lookup) that were refused or failed
//! - `PipelineError`: workflow-level failures surfaced to the job queue
//!
//! Everything else propagates as `anyhow::Error` with context.

use std::time::Duration;

use docket_common::PhaseCode;
use thiserror::Error;

use crate::gateway::ProviderError;
use crate::resilience::Dependency;

/// Errors from a call routed through the service registry.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Circuit open for {dependency}")]
    CircuitOpen { dependency: Dependency },

    #[error("Rate limited on {dependency}, retry after {retry_after:?}")]
    RateLimited {
        dependency: Dependency,
        retry_after: Duration,
    },

    #[error("Call to {dependency} timed out after {after:?}")]
    Timeout {
        dependency: Dependency,
        after: Duration,
    },

    #[error("Call to {dependency} failed: {source}")]
    Failed {
        dependency: Dependency,
        #[source]
        source: anyhow::Error,
    },
}

impl DependencyError {
    pub fn dependency(&self) -> Dependency {
        match self {
            Self::CircuitOpen { dependency }
            | Self::RateLimited { dependency, .. }
            | Self::Timeout { dependency, .. }
            | Self::Failed { dependency, .. } => *dependency,
        }
    }

    /// Whether a backoff retry may succeed. An open circuit is not retried
    /// in-process; the job queue re-invokes the step later. Permanent
    /// provider errors (bad request, auth) are not retried either.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => false,
            Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::Failed { source, .. } => source
                .downcast_ref::<ProviderError>()
                .is_none_or(ProviderError::is_retryable),
        }
    }
}

/// Errors surfaced from a workflow step.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Order {id} not found")]
    OrderNotFound { id: i64 },

    #[error("Checkpoint {id} not found")]
    CheckpointNotFound { id: i64 },

    #[error("Order {order_id} is locked by another worker")]
    LeaseHeld { order_id: i64 },

    #[error("Order {order_id} was cancelled")]
    Cancelled { order_id: i64 },

    #[error("Phase {phase} failed: {message}")]
    PhaseFailed { phase: PhaseCode, message: String },

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_is_not_retryable() {
        let err = DependencyError::CircuitOpen {
            dependency: Dependency::CaseLaw,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.dependency(), Dependency::CaseLaw);
        assert!(err.to_string().contains("case_law"));
    }

    #[test]
    fn timeout_is_retryable_and_carries_duration() {
        let err = DependencyError::Timeout {
            dependency: Dependency::SlowModel,
            after: Duration::from_secs(90),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("90"));
    }

    #[test]
    fn pipeline_error_converts_from_dependency_error() {
        let inner = DependencyError::RateLimited {
            dependency: Dependency::FastModel,
            retry_after: Duration::from_millis(250),
        };
        let err: PipelineError = inner.into();
        match err {
            PipelineError::Dependency(DependencyError::RateLimited { dependency, .. }) => {
                assert_eq!(dependency, Dependency::FastModel)
            }
            other => panic!("Expected Dependency(RateLimited), got {other:?}"),
        }
    }

    #[test]
    fn phase_failed_names_the_phase_code() {
        let err = PipelineError::PhaseFailed {
            phase: PhaseCode::CitationCheck,
            message: "no draft".into(),
        };
        assert!(err.to_string().contains("V.1"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::OrderNotFound { id: 1 });
        assert_std_error(&DependencyError::CircuitOpen {
            dependency: Dependency::FastModel,
        });
    }
}
