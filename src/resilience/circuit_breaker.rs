//! Durable circuit breaker.
//!
//! State lives in the shared store and is re-read on every call; nothing is
//! cached between invocations. Transitions are strictly
//! `Closed -> Open -> HalfOpen -> {Closed, Open}`. The `Open -> HalfOpen`
//! move happens lazily when a caller reads an expired open record, through a
//! conditional write so concurrent readers agree on who probes first.
//!
//! A HALF_OPEN breaker whose admitted calls never report back (dropped
//! futures, crashed workers) re-opens once `open_timeout` has passed since
//! the last admission, which starts a fresh HALF_OPEN window.
//!
//! If the store cannot be read or written the breaker fails open: calls are
//! allowed and the error is logged.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Dependency;
use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(Self::Closed),
            "OPEN" => Ok(Self::Open),
            "HALF_OPEN" => Ok(Self::HalfOpen),
            _ => Err(format!("Invalid breaker state: {}", s)),
        }
    }
}

/// Persisted breaker state for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub dependency: Dependency,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Probe calls admitted since entering HALF_OPEN.
    pub half_open_attempts: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    /// When the most recent HALF_OPEN call was admitted.
    pub last_admitted_at: Option<DateTime<Utc>>,
}

impl BreakerRecord {
    pub fn closed(dependency: Dependency) -> Self {
        Self {
            dependency,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_attempts: 0,
            last_failure_at: None,
            last_success_at: None,
            opened_at: None,
            last_admitted_at: None,
        }
    }
}

/// Durable storage for breaker records.
#[async_trait]
pub trait BreakerStore: Send + Sync {
    async fn load_breaker(&self, dependency: Dependency) -> Result<Option<BreakerRecord>>;

    /// Last-writer-wins upsert; used for counters where staleness is tolerable.
    async fn save_breaker(&self, record: &BreakerRecord) -> Result<()>;

    /// Replace the record only if it is still in `expected` state with the
    /// same `opened_at`. Returns whether the write happened.
    async fn transition_breaker(
        &self,
        expected: BreakerState,
        expected_opened_at: Option<DateTime<Utc>>,
        record: &BreakerRecord,
    ) -> Result<bool>;
}

pub struct CircuitBreaker {
    dependency: Dependency,
    config: BreakerConfig,
    store: Arc<dyn BreakerStore>,
}

impl CircuitBreaker {
    pub fn new(dependency: Dependency, config: BreakerConfig, store: Arc<dyn BreakerStore>) -> Self {
        Self {
            dependency,
            config,
            store,
        }
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub async fn allow_request(&self) -> bool {
        self.allow_request_at(Utc::now()).await
    }

    pub async fn record_success(&self) {
        self.record_success_at(Utc::now()).await
    }

    pub async fn record_failure(&self) {
        self.record_failure_at(Utc::now()).await
    }

    /// Current record with the lazy HALF_OPEN view applied, without
    /// admitting a call. For status output.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Result<BreakerRecord> {
        let mut record = self
            .store
            .load_breaker(self.dependency)
            .await?
            .unwrap_or_else(|| BreakerRecord::closed(self.dependency));
        if record.state == BreakerState::Open && self.open_window_elapsed(&record, now) {
            record.state = BreakerState::HalfOpen;
            record.half_open_attempts = 0;
            record.success_count = 0;
        }
        Ok(record)
    }

    pub async fn allow_request_at(&self, now: DateTime<Utc>) -> bool {
        let record = match self.store.load_breaker(self.dependency).await {
            Ok(Some(record)) => record,
            Ok(None) => return true,
            Err(e) => {
                warn!(service = %self.dependency, error = %e, "Breaker store unavailable, failing open");
                return true;
            }
        };

        match record.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if !self.open_window_elapsed(&record, now) {
                    debug!(service = %self.dependency, "Circuit open, rejecting call");
                    return false;
                }
                self.begin_half_open(&record, now).await
            }
            BreakerState::HalfOpen => {
                if record.half_open_attempts < self.config.half_open_max_calls {
                    return self.take_half_open_slot(record, now).await;
                }
                if !self.half_open_stalled(&record, now) {
                    return false;
                }
                warn!(
                    service = %self.dependency,
                    attempts = record.half_open_attempts,
                    "Half-open calls never reported back, re-opening"
                );
                let mut reopened = record.clone();
                reopened.state = BreakerState::Open;
                reopened.opened_at = record.last_admitted_at;
                reopened.half_open_attempts = 0;
                reopened.success_count = 0;
                match self
                    .store
                    .transition_breaker(BreakerState::HalfOpen, record.opened_at, &reopened)
                    .await
                {
                    Ok(true) => self.begin_half_open(&reopened, now).await,
                    Ok(false) => self.admit_half_open(now).await,
                    Err(e) => {
                        warn!(service = %self.dependency, error = %e, "Breaker store unavailable, failing open");
                        true
                    }
                }
            }
        }
    }

    /// Give back a HALF_OPEN slot for a call that ended without a verdict on
    /// the dependency's health (a permanent request error, a call that
    /// never went out).
    pub async fn release_slot(&self) {
        let mut record = match self.store.load_breaker(self.dependency).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!(service = %self.dependency, error = %e, "Breaker store unavailable, slot not released");
                return;
            }
        };
        if record.state != BreakerState::HalfOpen || record.half_open_attempts == 0 {
            return;
        }
        record.half_open_attempts -= 1;
        self.persist(&record).await;
    }

    /// Conditional `Open -> HalfOpen` that admits the winner as the first
    /// HALF_OPEN call.
    async fn begin_half_open(&self, open: &BreakerRecord, now: DateTime<Utc>) -> bool {
        let mut probing = open.clone();
        probing.state = BreakerState::HalfOpen;
        probing.half_open_attempts = 1;
        probing.success_count = 0;
        probing.last_admitted_at = Some(now);
        match self
            .store
            .transition_breaker(BreakerState::Open, open.opened_at, &probing)
            .await
        {
            Ok(true) => {
                info!(service = %self.dependency, "Circuit breaker half-open, probing");
                true
            }
            // Another caller moved it first; evaluate what they wrote.
            Ok(false) => self.admit_half_open(now).await,
            Err(e) => {
                warn!(service = %self.dependency, error = %e, "Breaker store unavailable, failing open");
                true
            }
        }
    }

    async fn admit_half_open(&self, now: DateTime<Utc>) -> bool {
        let record = match self.store.load_breaker(self.dependency).await {
            Ok(Some(record)) => record,
            Ok(None) => return true,
            Err(e) => {
                warn!(service = %self.dependency, error = %e, "Breaker store unavailable, failing open");
                return true;
            }
        };
        match record.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if record.half_open_attempts >= self.config.half_open_max_calls {
                    return false;
                }
                self.take_half_open_slot(record, now).await
            }
        }
    }

    async fn take_half_open_slot(&self, mut record: BreakerRecord, now: DateTime<Utc>) -> bool {
        record.half_open_attempts += 1;
        record.last_admitted_at = Some(now);
        if let Err(e) = self.store.save_breaker(&record).await {
            warn!(service = %self.dependency, error = %e, "Failed to persist half-open attempt");
        }
        true
    }

    pub async fn record_success_at(&self, now: DateTime<Utc>) {
        let mut record = match self.load_or_closed().await {
            Some(record) => record,
            None => return,
        };
        record.last_success_at = Some(now);

        match record.state {
            BreakerState::Closed => {
                record.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                record.success_count += 1;
                if record.success_count >= self.config.success_threshold {
                    info!(
                        service = %self.dependency,
                        successes = record.success_count,
                        "Circuit breaker closing after successful recovery"
                    );
                    record = BreakerRecord {
                        last_success_at: Some(now),
                        last_failure_at: record.last_failure_at,
                        ..BreakerRecord::closed(self.dependency)
                    };
                }
            }
            BreakerState::Open => {
                debug!(service = %self.dependency, "Success recorded while circuit open");
            }
        }
        self.persist(&record).await;
    }

    pub async fn record_failure_at(&self, now: DateTime<Utc>) {
        let mut record = match self.load_or_closed().await {
            Some(record) => record,
            None => return,
        };
        record.last_failure_at = Some(now);

        match record.state {
            BreakerState::Closed => {
                record.failure_count += 1;
                if record.failure_count >= self.config.failure_threshold {
                    warn!(
                        service = %self.dependency,
                        failures = record.failure_count,
                        "Circuit breaker opening due to failures"
                    );
                    self.open(&mut record, now);
                }
            }
            BreakerState::HalfOpen => {
                warn!(service = %self.dependency, "Circuit breaker re-opening after half-open failure");
                self.open(&mut record, now);
            }
            BreakerState::Open => {}
        }
        self.persist(&record).await;
    }

    fn open(&self, record: &mut BreakerRecord, now: DateTime<Utc>) {
        record.state = BreakerState::Open;
        record.opened_at = Some(now);
        record.success_count = 0;
        record.half_open_attempts = 0;
        record.last_admitted_at = None;
    }

    fn open_window_elapsed(&self, record: &BreakerRecord, now: DateTime<Utc>) -> bool {
        match record.opened_at {
            Some(opened_at) => now - opened_at >= self.config.open_timeout(),
            None => true,
        }
    }

    fn half_open_stalled(&self, record: &BreakerRecord, now: DateTime<Utc>) -> bool {
        match record.last_admitted_at {
            Some(last_admitted_at) => now - last_admitted_at >= self.config.open_timeout(),
            None => true,
        }
    }

    async fn load_or_closed(&self) -> Option<BreakerRecord> {
        match self.store.load_breaker(self.dependency).await {
            Ok(record) => Some(record.unwrap_or_else(|| BreakerRecord::closed(self.dependency))),
            Err(e) => {
                warn!(service = %self.dependency, error = %e, "Breaker store unavailable, outcome not recorded");
                None
            }
        }
    }

    async fn persist(&self, record: &BreakerRecord) {
        if let Err(e) = self.store.save_breaker(record).await {
            warn!(service = %self.dependency, error = %e, "Failed to persist breaker state");
        }
    }
}
