//! Cancellation tokens for orders currently running in this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct ActiveRuns {
    tokens: Arc<Mutex<HashMap<i64, CancellationToken>>>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a run of `order_id`, shared with any run already active.
    pub fn register(&self, order_id: i64) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens
            .entry(order_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Trip the token of a live run. Returns whether one was running here.
    pub fn cancel(&self, order_id: i64) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        match tokens.get(&order_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn finish(&self, order_id: i64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.remove(&order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_registered_token() {
        let runs = ActiveRuns::new();
        let token = runs.register(7);
        assert!(runs.cancel(7));
        assert!(token.is_cancelled());
        runs.finish(7);
        assert!(!runs.cancel(7));
        assert!(!runs.register(7).is_cancelled());
    }
}
