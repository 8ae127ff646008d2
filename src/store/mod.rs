//! Durable store: one SQLite database behind an async-safe handle.
//!
//! Every table the engine touches lives here. Single-fire triggers (loop
//! increments, Protocol-10 and cost-cap exits, terminal checkpoint actions)
//! are conditional `UPDATE ... WHERE` statements whose affected-row count
//! tells the caller whether it won; nothing reads a flag and then writes it.

mod breakers;
mod checkpoints;
mod claims;
mod ledger;
pub mod models;
mod orders;
mod workflows;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub use models::*;

/// Async-safe handle to the docket database.
///
/// Wraps `DocketDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<DocketDb>>,
}

impl DbHandle {
    pub fn new(db: DocketDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(DocketDb::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(DocketDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&DocketDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup, CLI one-shots
    /// and tests; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, DocketDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct DocketDb {
    conn: Connection,
}

impl DocketDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure connection")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS orders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tier TEXT NOT NULL,
                    motion_type TEXT NOT NULL,
                    jurisdiction TEXT NOT NULL,
                    filing_deadline TEXT,
                    status TEXT NOT NULL DEFAULT 'submitted',
                    customer_email TEXT,
                    amount_paid_cents INTEGER NOT NULL DEFAULT 0,
                    case_caption TEXT NOT NULL DEFAULT '',
                    statement_of_facts TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS workflows (
                    order_id INTEGER PRIMARY KEY REFERENCES orders(id) ON DELETE CASCADE,
                    current_phase TEXT NOT NULL,
                    revision_loops INTEGER NOT NULL DEFAULT 0,
                    claim_count INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'pending',
                    protocol10_triggered INTEGER NOT NULL DEFAULT 0,
                    cost_cap_triggered INTEGER NOT NULL DEFAULT 0,
                    last_grade TEXT,
                    last_loop_execution_id INTEGER,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS revision_loops (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    execution_id INTEGER NOT NULL,
                    grade TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(order_id, execution_id)
                );

                CREATE TABLE IF NOT EXISTS phase_executions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    attempt INTEGER NOT NULL,
                    loop_number INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    model TEXT,
                    model_tier TEXT,
                    thinking_budget INTEGER,
                    input_tokens INTEGER NOT NULL DEFAULT 0,
                    output_tokens INTEGER NOT NULL DEFAULT 0,
                    output TEXT NOT NULL DEFAULT 'null',
                    error TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS claims (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    origin_phase TEXT NOT NULL,
                    loop_number INTEGER NOT NULL,
                    claim_key TEXT NOT NULL,
                    proposition TEXT NOT NULL,
                    citation TEXT NOT NULL,
                    quoted_text TEXT,
                    sole_authority INTEGER NOT NULL DEFAULT 0,
                    dispositive_element INTEGER NOT NULL DEFAULT 0,
                    status TEXT,
                    verified INTEGER NOT NULL DEFAULT 0,
                    source_id TEXT,
                    scores TEXT NOT NULL DEFAULT '{}',
                    composite REAL,
                    verdict TEXT,
                    flags TEXT NOT NULL DEFAULT '[]',
                    verified_phase TEXT,
                    verified_loop INTEGER,
                    UNIQUE(order_id, claim_key),
                    CHECK (verified = 0 OR source_id IS NOT NULL)
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    resume_phase TEXT,
                    reason TEXT NOT NULL DEFAULT '',
                    state TEXT NOT NULL DEFAULT 'PENDING',
                    created_at TEXT NOT NULL,
                    resolved_at TEXT,
                    resolved_by TEXT,
                    resolution TEXT,
                    timeout_schedule TEXT NOT NULL DEFAULT '[]',
                    auto_actioned INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS cost_ledger (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    model TEXT NOT NULL,
                    input_tokens INTEGER NOT NULL DEFAULT 0,
                    output_tokens INTEGER NOT NULL DEFAULT 0,
                    amount_nanos INTEGER NOT NULL,
                    is_rework_reset INTEGER NOT NULL DEFAULT 0,
                    execution_id INTEGER,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS circuit_breakers (
                    service TEXT PRIMARY KEY,
                    state TEXT NOT NULL DEFAULT 'CLOSED',
                    failure_count INTEGER NOT NULL DEFAULT 0,
                    success_count INTEGER NOT NULL DEFAULT 0,
                    half_open_attempts INTEGER NOT NULL DEFAULT 0,
                    last_failure_at TEXT,
                    last_success_at TEXT,
                    opened_at TEXT,
                    last_admitted_at TEXT,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS disclosures (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    text TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE(order_id, kind)
                );

                CREATE TABLE IF NOT EXISTS refunds (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    checkpoint_id INTEGER NOT NULL UNIQUE REFERENCES checkpoints(id),
                    amount_cents INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    created_at TEXT NOT NULL,
                    issued_at TEXT
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    checkpoint_id INTEGER NOT NULL REFERENCES checkpoints(id) ON DELETE CASCADE,
                    stage TEXT NOT NULL,
                    sent_at TEXT NOT NULL,
                    UNIQUE(checkpoint_id, stage)
                );

                CREATE TABLE IF NOT EXISTS order_leases (
                    order_id INTEGER PRIMARY KEY REFERENCES orders(id) ON DELETE CASCADE,
                    holder TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS deliverables (
                    order_id INTEGER PRIMARY KEY REFERENCES orders(id) ON DELETE CASCADE,
                    body TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_phase_executions_order ON phase_executions(order_id);
                CREATE INDEX IF NOT EXISTS idx_claims_order ON claims(order_id);
                CREATE INDEX IF NOT EXISTS idx_checkpoints_order ON checkpoints(order_id);
                CREATE INDEX IF NOT EXISTS idx_checkpoints_state ON checkpoints(state);
                CREATE INDEX IF NOT EXISTS idx_cost_ledger_order ON cost_ledger(order_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_checkpoints_open
                    ON checkpoints(order_id, kind, phase) WHERE state = 'PENDING';
                CREATE UNIQUE INDEX IF NOT EXISTS idx_cost_ledger_execution
                    ON cost_ledger(execution_id) WHERE execution_id IS NOT NULL;
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that SQL
/// string comparison orders them correctly.
pub fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", s))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_enum<T>(value: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Failed to parse {}", what))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::NaiveDate;
    use docket_common::{MotionType, Order, Tier};

    use super::{DocketDb, NewOrder};

    pub fn sample_order() -> NewOrder {
        NewOrder {
            tier: Tier::C,
            motion_type: MotionType::SummaryJudgment,
            jurisdiction: "ca".into(),
            filing_deadline: NaiveDate::from_ymd_opt(2026, 11, 30),
            customer_email: Some("counsel@example.com".into()),
            amount_paid_cents: 250_000,
            case_caption: "Doe v. Acme Corp.".into(),
            statement_of_facts: "Plaintiff slipped on an unmarked wet floor.".into(),
        }
    }

    pub fn db_with_order(tier: Tier) -> (DocketDb, Order) {
        let db = DocketDb::new_in_memory().unwrap();
        let order = db
            .create_order(&NewOrder {
                tier,
                ..sample_order()
            })
            .unwrap();
        (db, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = DocketDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 13);
        Ok(())
    }

    #[test]
    fn test_migrations_are_rerunnable() -> Result<()> {
        let db = DocketDb::new_in_memory()?;
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_file_database_creates_parent_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("docket.db");
        DocketDb::new(&path)?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_timestamps_round_trip_and_sort_lexically() -> Result<()> {
        let early = parse_ts("2026-01-02T03:04:05.000Z")?;
        let late = early + chrono::Duration::hours(30);
        assert_eq!(parse_ts(&fmt_ts(late))?, late);
        assert!(fmt_ts(early) < fmt_ts(late));
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_runs_closures_off_thread() -> Result<()> {
        let handle = DbHandle::in_memory()?;
        let count = handle
            .call(|db| {
                db.conn
                    .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get::<_, i64>(0))
                    .context("count")
            })
            .await?;
        assert_eq!(count, 0);
        Ok(())
    }
}
