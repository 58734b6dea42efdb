// src/dispatch.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::store::Store;

/// Promotes due scheduled notifications into delivered notifications, exactly once.
pub struct DispatchEngine {
    store: Arc<dyn Store>,
    batch_size: i64,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn Store>, batch_size: i64) -> Self {
        Self { store, batch_size }
    }

    /// Claims and delivers everything due at `now`. Returns how many were delivered.
    ///
    /// An error aborts the rest of this run; whatever the failed batch claimed was rolled
    /// back with it, so those rows are picked up again on the next tick.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut delivered = 0;

        loop {
            let due = self
                .store
                .find_due_scheduled_notifications(now, self.batch_size)
                .await?;
            if due.is_empty() {
                break;
            }

            let ids: Vec<i64> = due.iter().map(|s| s.id).collect();
            let claimed = self.store.claim_and_deliver(&ids, now).await?;
            delivered += claimed.len();

            tracing::debug!(due = ids.len(), claimed = claimed.len(), "dispatched batch");

            // Short batch: nothing left. Empty claim: another tick took these rows.
            if (due.len() as i64) < self.batch_size || claimed.is_empty() {
                break;
            }
        }

        if delivered > 0 {
            tracing::info!(delivered, "delivered scheduled notifications");
        }
        Ok(delivered)
    }
}
