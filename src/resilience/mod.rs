//! Resilience for external dependencies: durable circuit breakers, token
//! bucket rate limiting and the registry that applies both (plus the global
//! model-call cap and caller-side timeouts) around every outbound call.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use circuit_breaker::{BreakerRecord, BreakerState, BreakerStore, CircuitBreaker};
pub use rate_limiter::{RateLimiter, TokenBucket};
pub use registry::ServiceRegistry;

/// An external dependency guarded by a breaker and a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    FastModel,
    SlowModel,
    CaseLaw,
}

impl Dependency {
    pub const ALL: [Dependency; 3] = [Self::FastModel, Self::SlowModel, Self::CaseLaw];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastModel => "fast_model",
            Self::SlowModel => "slow_model",
            Self::CaseLaw => "case_law",
        }
    }

    /// Model calls share the global concurrency cap; lookups do not.
    pub fn is_model(&self) -> bool {
        matches!(self, Self::FastModel | Self::SlowModel)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dependency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast_model" => Ok(Self::FastModel),
            "slow_model" => Ok(Self::SlowModel),
            "case_law" => Ok(Self::CaseLaw),
            _ => Err(format!("Invalid dependency: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_names_parse_back() {
        for dependency in Dependency::ALL {
            assert_eq!(dependency.as_str().parse::<Dependency>().unwrap(), dependency);
        }
        assert!("payments".parse::<Dependency>().is_err());
    }

    #[test]
    fn only_model_dependencies_count_against_the_model_cap() {
        assert!(Dependency::FastModel.is_model());
        assert!(!Dependency::CaseLaw.is_model());
    }
}
