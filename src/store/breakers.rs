use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{DbHandle, DocketDb, fmt_ts, parse_enum, parse_opt_ts};
use crate::resilience::{BreakerRecord, BreakerState, BreakerStore, Dependency};

impl DocketDb {
    pub fn load_breaker(&self, dependency: Dependency) -> Result<Option<BreakerRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT state, failure_count, success_count, half_open_attempts, last_failure_at, last_success_at, opened_at, last_admitted_at
                 FROM circuit_breakers WHERE service = ?1",
                params![dependency.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query circuit breaker")?;
        row.map(
            |(state, failure_count, success_count, half_open_attempts, last_failure, last_success, opened, last_admitted)| {
                Ok(BreakerRecord {
                    dependency,
                    state: parse_enum(&state, "breaker state")?,
                    failure_count,
                    success_count,
                    half_open_attempts,
                    last_failure_at: parse_opt_ts(last_failure)?,
                    last_success_at: parse_opt_ts(last_success)?,
                    opened_at: parse_opt_ts(opened)?,
                    last_admitted_at: parse_opt_ts(last_admitted)?,
                })
            },
        )
        .transpose()
    }

    pub fn save_breaker(&self, record: &BreakerRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO circuit_breakers (service, state, failure_count, success_count, half_open_attempts, last_failure_at, last_success_at, opened_at, last_admitted_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
                 ON CONFLICT(service) DO UPDATE SET
                    state = excluded.state,
                    failure_count = excluded.failure_count,
                    success_count = excluded.success_count,
                    half_open_attempts = excluded.half_open_attempts,
                    last_failure_at = excluded.last_failure_at,
                    last_success_at = excluded.last_success_at,
                    opened_at = excluded.opened_at,
                    last_admitted_at = excluded.last_admitted_at,
                    updated_at = excluded.updated_at",
                params![
                    record.dependency.as_str(),
                    record.state.as_str(),
                    record.failure_count,
                    record.success_count,
                    record.half_open_attempts,
                    record.last_failure_at.map(fmt_ts),
                    record.last_success_at.map(fmt_ts),
                    record.opened_at.map(fmt_ts),
                    record.last_admitted_at.map(fmt_ts),
                ],
            )
            .context("Failed to save circuit breaker")?;
        Ok(())
    }

    /// Compare-and-set on `(state, opened_at)`.
    pub fn transition_breaker(
        &self,
        expected: BreakerState,
        expected_opened_at: Option<DateTime<Utc>>,
        record: &BreakerRecord,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE circuit_breakers
                 SET state = ?3, failure_count = ?4, success_count = ?5, half_open_attempts = ?6,
                     last_failure_at = ?7, last_success_at = ?8, opened_at = ?9, last_admitted_at = ?11,
                     updated_at = datetime('now')
                 WHERE service = ?1 AND state = ?2 AND opened_at IS ?10",
                params![
                    record.dependency.as_str(),
                    expected.as_str(),
                    record.state.as_str(),
                    record.failure_count,
                    record.success_count,
                    record.half_open_attempts,
                    record.last_failure_at.map(fmt_ts),
                    record.last_success_at.map(fmt_ts),
                    record.opened_at.map(fmt_ts),
                    expected_opened_at.map(fmt_ts),
                    record.last_admitted_at.map(fmt_ts),
                ],
            )
            .context("Failed to transition circuit breaker")?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl BreakerStore for DbHandle {
    async fn load_breaker(&self, dependency: Dependency) -> Result<Option<BreakerRecord>> {
        self.call(move |db| db.load_breaker(dependency)).await
    }

    async fn save_breaker(&self, record: &BreakerRecord) -> Result<()> {
        let record = record.clone();
        self.call(move |db| db.save_breaker(&record)).await
    }

    async fn transition_breaker(
        &self,
        expected: BreakerState,
        expected_opened_at: Option<DateTime<Utc>>,
        record: &BreakerRecord,
    ) -> Result<bool> {
        let record = record.clone();
        self.call(move |db| db.transition_breaker(expected, expected_opened_at, &record))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::resilience::CircuitBreaker;
    use std::sync::Arc;

    fn open_record(at: DateTime<Utc>) -> BreakerRecord {
        BreakerRecord {
            state: BreakerState::Open,
            failure_count: 3,
            opened_at: Some(at),
            last_failure_at: Some(at),
            ..BreakerRecord::closed(Dependency::CaseLaw)
        }
    }

    #[test]
    fn test_breaker_upsert_round_trips() -> Result<()> {
        let db = DocketDb::new_in_memory()?;
        assert!(db.load_breaker(Dependency::CaseLaw)?.is_none());
        let record = open_record(Utc::now());
        db.save_breaker(&record)?;
        db.save_breaker(&record)?;
        assert_eq!(db.load_breaker(Dependency::CaseLaw)?, Some(record));
        Ok(())
    }

    #[test]
    fn test_transition_requires_matching_open_timestamp() -> Result<()> {
        let db = DocketDb::new_in_memory()?;
        let opened = Utc::now();
        let record = open_record(opened);
        db.save_breaker(&record)?;

        let probing = BreakerRecord {
            state: BreakerState::HalfOpen,
            half_open_attempts: 1,
            ..record.clone()
        };
        let stale = opened - chrono::Duration::seconds(5);
        assert!(!db.transition_breaker(BreakerState::Open, Some(stale), &probing)?);
        assert!(db.transition_breaker(BreakerState::Open, Some(opened), &probing)?);
        assert!(!db.transition_breaker(BreakerState::Open, Some(opened), &probing)?);
        assert_eq!(db.load_breaker(Dependency::CaseLaw)?.unwrap().state, BreakerState::HalfOpen);
        Ok(())
    }

    #[tokio::test]
    async fn test_breaker_state_survives_a_new_handle_on_the_same_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("docket.db");
        let config = BreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            open_timeout_secs: 60,
            half_open_max_calls: 1,
        };

        let store: Arc<dyn BreakerStore> = Arc::new(DbHandle::open(&path)?);
        let breaker = CircuitBreaker::new(Dependency::SlowModel, config, store);
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert!(!breaker.allow_request().await);

        let reopened: Arc<dyn BreakerStore> = Arc::new(DbHandle::open(&path)?);
        let breaker = CircuitBreaker::new(Dependency::SlowModel, config, reopened);
        assert!(!breaker.allow_request().await);
        Ok(())
    }
}
