// src/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    CloseOutcome, NewNotification, NewScheduledNotification, NewVote, PollClosure, PollSnapshot,
    ScheduledNotification, Vote,
};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

/// Durable state shared by the background engines and the request handlers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Unsent scheduled notifications with `send_at <= now`, oldest first, at most `limit`.
    async fn find_due_scheduled_notifications(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledNotification>, StoreError>;

    /// Marks the given rows sent and inserts one notification per row, atomically.
    ///
    /// Only rows that are still unsent and due are claimed; the returned rows are exactly
    /// the ones this call claimed. If the inserts fail nothing is claimed.
    async fn claim_and_deliver(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledNotification>, StoreError>;

    async fn insert_notifications(&self, records: &[NewNotification]) -> Result<u64, StoreError>;

    async fn insert_scheduled_notifications(
        &self,
        records: &[NewScheduledNotification],
    ) -> Result<u64, StoreError>;

    /// ACTIVE polls with `expires_at < now`, with vote counts and trip members.
    async fn find_expired_active_polls(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PollSnapshot>, StoreError>;

    async fn find_active_poll(&self, poll_id: i64) -> Result<Option<PollSnapshot>, StoreError>;

    /// Applies the transition only if the poll is still ACTIVE and its votes still match
    /// `closure.tally`.
    async fn close_poll_if_active(&self, closure: &PollClosure) -> Result<CloseOutcome, StoreError>;

    /// Records (or replaces) a user's vote, rejecting votes on closed or expired polls.
    async fn cast_vote(&self, vote: &NewVote, now: DateTime<Utc>) -> Result<Vote, StoreError>;
}
