//! The single place outbound calls are admitted.
//!
//! Built once at startup and passed by reference to every component that
//! calls out. Persisted breaker state lives in the store, not here; the
//! registry only holds the in-process token buckets and the global
//! model-call semaphore.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{BreakerRecord, BreakerStore, CircuitBreaker, Dependency, RateLimiter};
use crate::config::DocketConfig;
use crate::errors::DependencyError;
use crate::gateway::ProviderError;

struct Guard {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    max_wait: Duration,
}

pub struct ServiceRegistry {
    guards: Vec<Guard>,
    model_slots: Arc<Semaphore>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl ServiceRegistry {
    pub fn new(config: &DocketConfig, store: Arc<dyn BreakerStore>) -> Self {
        let guards = Dependency::ALL
            .iter()
            .map(|&dependency| {
                let limits = config.rate_limits.for_dependency(dependency);
                Guard {
                    breaker: CircuitBreaker::new(
                        dependency,
                        config.breakers.for_dependency(dependency),
                        store.clone(),
                    ),
                    limiter: RateLimiter::new(dependency, &limits),
                    max_wait: limits.max_wait(),
                }
            })
            .collect();
        Self {
            guards,
            model_slots: Arc::new(Semaphore::new(config.concurrency.max_model_calls.max(1))),
            max_retries: config.models.max_retries,
            retry_base_delay: config.models.retry_base_delay(),
        }
    }

    fn guard(&self, dependency: Dependency) -> &Guard {
        // `guards` is built from `Dependency::ALL` in declaration order.
        &self.guards[dependency as usize]
    }

    pub fn breaker(&self, dependency: Dependency) -> &CircuitBreaker {
        &self.guard(dependency).breaker
    }

    pub async fn breaker_snapshots(&self) -> Vec<(Dependency, anyhow::Result<BreakerRecord>)> {
        let now = Utc::now();
        let mut out = Vec::with_capacity(self.guards.len());
        for guard in &self.guards {
            out.push((guard.breaker.dependency(), guard.breaker.snapshot_at(now).await));
        }
        out
    }

    /// Run `op` once through rate limiter, breaker, model-call cap and a
    /// caller-side timeout. A timeout is a breaker failure; a permanent
    /// provider error says nothing about health and only gives back its
    /// HALF_OPEN slot.
    pub async fn call<T, F, Fut>(
        &self,
        dependency: Dependency,
        timeout: Duration,
        op: F,
    ) -> Result<T, DependencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let guard = self.guard(dependency);

        // Token first: a call turned away here never holds a HALF_OPEN slot.
        guard
            .limiter
            .acquire(guard.max_wait)
            .await
            .map_err(|retry_after| DependencyError::RateLimited {
                dependency,
                retry_after,
            })?;

        if !guard.breaker.allow_request().await {
            return Err(DependencyError::CircuitOpen { dependency });
        }

        let _permit = if dependency.is_model() {
            match self.model_slots.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    guard.breaker.release_slot().await;
                    return Err(DependencyError::Failed {
                        dependency,
                        source: anyhow::anyhow!("model slot semaphore closed: {}", e),
                    });
                }
            }
        } else {
            None
        };

        match tokio::time::timeout(timeout, op()).await {
            Err(_) => {
                warn!(service = %dependency, ?timeout, "Call timed out");
                guard.breaker.record_failure().await;
                Err(DependencyError::Timeout {
                    dependency,
                    after: timeout,
                })
            }
            Ok(Err(source)) => {
                if counts_against_breaker(&source) {
                    guard.breaker.record_failure().await;
                } else {
                    debug!(service = %dependency, error = %source, "Permanent error, releasing half-open slot");
                    guard.breaker.release_slot().await;
                }
                Err(DependencyError::Failed { dependency, source })
            }
            Ok(Ok(value)) => {
                guard.breaker.record_success().await;
                Ok(value)
            }
        }
    }

    /// `call` with exponential backoff on transient errors. An open circuit
    /// is returned immediately.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        dependency: Dependency,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, DependencyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match self.call(dependency, timeout, || op()).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = match &e {
                        DependencyError::RateLimited { retry_after, .. } => *retry_after,
                        _ => backoff_delay(self.retry_base_delay, attempt),
                    };
                    warn!(
                        service = %dependency,
                        attempt = attempt + 1,
                        ?delay,
                        error = %e,
                        "Retrying dependency call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn counts_against_breaker(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<ProviderError>() {
        Some(provider) => provider.is_retryable(),
        None => true,
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}
