// services.rs
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::Clock;
use crate::models::{Channel, NewNotification, NewScheduledNotification, NotificationType};
use crate::store::Store;

/// What to deliver, and to whom.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_ids: Vec<i64>,
    pub trip_id: i64,
    pub notification_type: NotificationType,
    pub related_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub payload: Option<Value>,
    pub channel: Channel,
    /// Deliver later instead of now. Ignored unless strictly in the future.
    pub send_at: Option<DateTime<Utc>>,
}

/// Fans a notification out to many users, either immediately or deferred.
///
/// Delivery is best-effort: store failures are logged here and never reach the caller,
/// so a failed notification can't undo the state change that triggered it.
pub struct NotificationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn notify_users(&self, request: NotificationRequest) {
        // One record per distinct user.
        let user_ids: BTreeSet<i64> = request.user_ids.iter().copied().collect();
        if user_ids.is_empty() {
            tracing::debug!(
                notification_type = %request.notification_type,
                trip_id = request.trip_id,
                "no recipients, skipping notification"
            );
            return;
        }

        let now = self.clock.now();
        let result = match request.send_at.filter(|at| *at > now) {
            Some(send_at) => {
                let records: Vec<NewScheduledNotification> = user_ids
                    .iter()
                    .map(|&target_user_id| NewScheduledNotification {
                        target_user_id,
                        trip_id: request.trip_id,
                        notification_type: request.notification_type.clone(),
                        related_id: request.related_id,
                        title: request.title.clone(),
                        message: request.message.clone(),
                        payload: request.payload.clone(),
                        channel: request.channel,
                        send_at,
                    })
                    .collect();
                self.store.insert_scheduled_notifications(&records).await
            }
            None => {
                let records: Vec<NewNotification> = user_ids
                    .iter()
                    .map(|&user_id| NewNotification {
                        user_id,
                        trip_id: Some(request.trip_id),
                        notification_type: request.notification_type.clone(),
                        related_id: request.related_id,
                        title: request.title.clone(),
                        message: request.message.clone(),
                        payload: request.payload.clone(),
                    })
                    .collect();
                self.store.insert_notifications(&records).await
            }
        };

        match result {
            Ok(count) => tracing::debug!(
                notification_type = %request.notification_type,
                trip_id = request.trip_id,
                count,
                deferred = request.send_at.is_some_and(|at| at > now),
                "notifications recorded"
            ),
            Err(e) => tracing::warn!(
                notification_type = %request.notification_type,
                trip_id = request.trip_id,
                recipients = user_ids.len(),
                error = %e,
                "failed to record notifications"
            ),
        }
    }
}
