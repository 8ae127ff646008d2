//! Refund issuing boundary.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::store::Refund;

/// Payment provider refund call. Implementations must treat
/// `idempotency_key` as the provider's idempotency key so a retried refund
/// is never paid twice.
#[async_trait]
pub trait RefundGateway: Send + Sync {
    async fn issue_refund(&self, refund: &Refund, idempotency_key: &str) -> Result<()>;
}

/// Records the refund in the log only; payments are settled out of band.
#[derive(Debug, Default)]
pub struct LoggingRefundGateway;

#[async_trait]
impl RefundGateway for LoggingRefundGateway {
    async fn issue_refund(&self, refund: &Refund, idempotency_key: &str) -> Result<()> {
        info!(
            order_id = refund.order_id,
            refund_id = refund.id,
            amount_cents = refund.amount_cents,
            idempotency_key,
            "Refund issued"
        );
        Ok(())
    }
}

/// `checkpoint-<id>`: one refund per checkpoint.
pub fn idempotency_key(refund: &Refund) -> String {
    format!("checkpoint-{}", refund.checkpoint_id)
}
