//! Step 1: does the cited authority exist?
//!
//! The lookup goes through the service registry like every other outbound
//! call. Anything other than a clean answer from the lookup becomes
//! `ApiError`, which defers the claim instead of failing it.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::Citation;
use crate::resilience::{Dependency, ServiceRegistry};

/// Subsequent treatment reported by the lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    #[default]
    Unknown,
    Positive,
    /// Criticized, distinguished or limited.
    Questioned,
    /// Overruled, superseded or reversed.
    Negative,
}

impl Treatment {
    pub fn is_declining(&self) -> bool {
        matches!(self, Self::Questioned | Self::Negative)
    }
}

/// Minimal record for a found authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub source_id: String,
    #[serde(default)]
    pub case_name: Option<String>,
    #[serde(default)]
    pub court: Option<String>,
    #[serde(default)]
    pub decided: Option<NaiveDate>,
    /// Opinion text or the best excerpt available; quote and holding
    /// checks run against it.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub treatment: Treatment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    Found(CaseRecord),
    NotFound,
}

/// External case-law search.
#[async_trait]
pub trait CaseLawLookup: Send + Sync {
    async fn lookup(&self, citation: &Citation) -> Result<LookupResult>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExistenceOutcome {
    Found(CaseRecord),
    NotFound,
    /// The lookup could not answer. Never counted as a pass or a failure.
    ApiError(String),
}

impl ExistenceOutcome {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Found(_) => Some(1.0),
            Self::NotFound => Some(0.0),
            Self::ApiError(_) => None,
        }
    }
}

pub async fn check_existence(
    registry: &ServiceRegistry,
    lookup: &dyn CaseLawLookup,
    citation: &Citation,
    timeout: Duration,
) -> ExistenceOutcome {
    let result = registry
        .call_with_retry(Dependency::CaseLaw, timeout, || lookup.lookup(citation))
        .await;
    match result {
        Ok(LookupResult::Found(record)) => {
            debug!(citation = %citation.raw, source_id = %record.source_id, "Citation found");
            ExistenceOutcome::Found(record)
        }
        Ok(LookupResult::NotFound) => {
            debug!(citation = %citation.raw, "Citation not found");
            ExistenceOutcome::NotFound
        }
        Err(e) => {
            warn!(citation = %citation.raw, error = %e, "Existence lookup unavailable");
            ExistenceOutcome::ApiError(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocketConfig;
    use crate::resilience::circuit_breaker::tests::MemoryBreakerStore;
    use std::sync::Arc;

    struct Fixed(Result<LookupResult, String>);

    #[async_trait]
    impl CaseLawLookup for Fixed {
        async fn lookup(&self, _citation: &Citation) -> Result<LookupResult> {
            self.0.clone().map_err(anyhow::Error::msg)
        }
    }

    fn registry() -> ServiceRegistry {
        let mut config = DocketConfig::default();
        config.models.max_retries = 0;
        ServiceRegistry::new(&config, Arc::new(MemoryBreakerStore::default()))
    }

    #[tokio::test]
    async fn lookup_error_fails_closed_to_api_error() {
        let outcome = check_existence(
            &registry(),
            &Fixed(Err("503".into())),
            &Citation::default(),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(outcome, ExistenceOutcome::ApiError(_)));
        assert_eq!(outcome.score(), None);
    }

    #[tokio::test]
    async fn not_found_scores_zero() {
        let outcome = check_existence(
            &registry(),
            &Fixed(Ok(LookupResult::NotFound)),
            &Citation::default(),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(outcome, ExistenceOutcome::NotFound);
        assert_eq!(outcome.score(), Some(0.0));
    }

    #[test]
    fn questioned_and_negative_treatment_are_declining() {
        assert!(Treatment::Negative.is_declining());
        assert!(Treatment::Questioned.is_declining());
        assert!(!Treatment::Positive.is_declining());
    }
}
