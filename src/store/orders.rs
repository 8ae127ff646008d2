use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use docket_common::{Order, OrderStatus};
use rusqlite::{OptionalExtension, params};

use super::{Deliverable, DocketDb, NewOrder, fmt_ts, parse_enum, parse_ts};

struct OrderRow {
    id: i64,
    tier: String,
    motion_type: String,
    jurisdiction: String,
    filing_deadline: Option<String>,
    status: String,
    customer_email: Option<String>,
    amount_paid_cents: i64,
    case_caption: String,
    statement_of_facts: String,
}

impl OrderRow {
    fn into_order(self) -> Result<Order> {
        let filing_deadline = self
            .filing_deadline
            .as_deref()
            .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d"))
            .transpose()
            .context("Failed to parse filing deadline")?;
        Ok(Order {
            id: self.id,
            tier: parse_enum(&self.tier, "order tier")?,
            motion_type: parse_enum(&self.motion_type, "motion type")?,
            jurisdiction: self.jurisdiction,
            filing_deadline,
            status: parse_enum(&self.status, "order status")?,
            customer_email: self.customer_email,
            amount_paid_cents: self.amount_paid_cents,
            case_caption: self.case_caption,
            statement_of_facts: self.statement_of_facts,
        })
    }
}

const ORDER_COLUMNS: &str = "id, tier, motion_type, jurisdiction, filing_deadline, status, customer_email, amount_paid_cents, case_caption, statement_of_facts";

fn read_order_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        id: row.get(0)?,
        tier: row.get(1)?,
        motion_type: row.get(2)?,
        jurisdiction: row.get(3)?,
        filing_deadline: row.get(4)?,
        status: row.get(5)?,
        customer_email: row.get(6)?,
        amount_paid_cents: row.get(7)?,
        case_caption: row.get(8)?,
        statement_of_facts: row.get(9)?,
    })
}

impl DocketDb {
    // ── Orders ────────────────────────────────────────────────────────

    pub fn create_order(&self, new: &NewOrder) -> Result<Order> {
        self.conn
            .execute(
                "INSERT INTO orders (tier, motion_type, jurisdiction, filing_deadline, customer_email, amount_paid_cents, case_caption, statement_of_facts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    new.tier.as_str(),
                    new.motion_type.as_str(),
                    new.jurisdiction.trim().to_ascii_uppercase(),
                    new.filing_deadline.map(|d| d.format("%Y-%m-%d").to_string()),
                    new.customer_email,
                    new.amount_paid_cents,
                    new.case_caption,
                    new.statement_of_facts,
                ],
            )
            .context("Failed to insert order")?;
        let id = self.conn.last_insert_rowid();
        self.get_order(id)?.context("Order not found after insert")
    }

    pub fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLUMNS),
                params![id],
                read_order_row,
            )
            .optional()
            .context("Failed to query order")?;
        row.map(OrderRow::into_order).transpose()
    }

    pub fn list_orders(&self) -> Result<Vec<Order>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM orders ORDER BY id", ORDER_COLUMNS))
            .context("Failed to prepare list_orders")?;
        let rows = stmt
            .query_map([], read_order_row)
            .context("Failed to query orders")?;
        let mut orders = Vec::new();
        for row in rows {
            orders.push(row.context("Failed to read order row")?.into_order()?);
        }
        Ok(orders)
    }

    /// Write a status unless the order already reached a final one.
    /// Returns whether the row changed.
    pub fn set_order_status(&self, id: i64, status: OrderStatus) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE orders SET status = ?1
                 WHERE id = ?2 AND status NOT IN ('completed', 'cancelled', 'refunded')",
                params![status.as_str(), id],
            )
            .context("Failed to update order status")?;
        Ok(changed > 0)
    }

    // ── Leases ────────────────────────────────────────────────────────

    /// Take or renew the per-order lease. Succeeds when no lease exists,
    /// the existing one expired, or `holder` already owns it.
    pub fn acquire_lease(
        &self,
        order_id: i64,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "INSERT INTO order_leases (order_id, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(order_id) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
                 WHERE order_leases.expires_at <= ?4 OR order_leases.holder = excluded.holder",
                params![order_id, holder, fmt_ts(now + ttl), fmt_ts(now)],
            )
            .context("Failed to acquire order lease")?;
        Ok(changed > 0)
    }

    pub fn release_lease(&self, order_id: i64, holder: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM order_leases WHERE order_id = ?1 AND holder = ?2",
                params![order_id, holder],
            )
            .context("Failed to release order lease")?;
        Ok(())
    }

    // ── Deliverables ──────────────────────────────────────────────────

    pub fn save_deliverable(&self, order_id: i64, body: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO deliverables (order_id, body, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(order_id) DO UPDATE SET body = excluded.body, created_at = excluded.created_at",
                params![order_id, body, fmt_ts(now)],
            )
            .context("Failed to save deliverable")?;
        Ok(())
    }

    pub fn get_deliverable(&self, order_id: i64) -> Result<Option<Deliverable>> {
        let row = self
            .conn
            .query_row(
                "SELECT order_id, body, created_at FROM deliverables WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query deliverable")?;
        row.map(|(order_id, body, created_at)| {
            Ok(Deliverable {
                order_id,
                body,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::sample_order;
    use docket_common::Tier;

    #[test]
    fn test_create_and_get_order() -> Result<()> {
        let db = DocketDb::new_in_memory()?;
        let order = db.create_order(&sample_order())?;
        assert_eq!(order.tier, Tier::C);
        assert_eq!(order.jurisdiction, "CA");
        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(db.get_order(order.id)?, Some(order));
        assert!(db.get_order(999)?.is_none());
        Ok(())
    }

    #[test]
    fn test_final_order_status_is_sticky() -> Result<()> {
        let db = DocketDb::new_in_memory()?;
        let order = db.create_order(&sample_order())?;
        assert!(db.set_order_status(order.id, OrderStatus::Cancelled)?);
        assert!(!db.set_order_status(order.id, OrderStatus::InProgress)?);
        assert_eq!(db.get_order(order.id)?.unwrap().status, OrderStatus::Cancelled);
        Ok(())
    }

    #[test]
    fn test_lease_excludes_other_holders_until_expiry() -> Result<()> {
        let db = DocketDb::new_in_memory()?;
        let order = db.create_order(&sample_order())?;
        let now = Utc::now();
        let ttl = chrono::Duration::minutes(15);

        assert!(db.acquire_lease(order.id, "worker-a", now, ttl)?);
        assert!(!db.acquire_lease(order.id, "worker-b", now, ttl)?);
        assert!(db.acquire_lease(order.id, "worker-a", now, ttl)?);
        assert!(db.acquire_lease(order.id, "worker-b", now + ttl, ttl)?);

        db.release_lease(order.id, "worker-a")?;
        assert!(!db.acquire_lease(order.id, "worker-a", now + ttl, ttl)?);
        db.release_lease(order.id, "worker-b")?;
        assert!(db.acquire_lease(order.id, "worker-a", now + ttl, ttl)?);
        Ok(())
    }

    #[test]
    fn test_deliverable_upserts() -> Result<()> {
        let db = DocketDb::new_in_memory()?;
        let order = db.create_order(&sample_order())?;
        db.save_deliverable(order.id, "draft one", Utc::now())?;
        db.save_deliverable(order.id, "draft two", Utc::now())?;
        assert_eq!(db.get_deliverable(order.id)?.unwrap().body, "draft two");
        Ok(())
    }
}
