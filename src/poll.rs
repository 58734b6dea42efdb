// src/poll.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::error::StoreError;
use crate::models::{
    Channel, CloseOutcome, NotificationType, OptionTally, PollClosure, PollSnapshot, PollStatus,
};
use crate::services::{NotificationRequest, NotificationService};
use crate::store::Store;

/// Leading options of a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    /// -1 when the poll has no options.
    pub max_votes: i64,
    /// Option ids at `max_votes`, in the order the options were given.
    pub leaders: Vec<i64>,
}

impl Tally {
    /// Lowest leading option id. A poll nobody voted on still has a winner, since every
    /// option ties at zero.
    pub fn winner(&self) -> Option<i64> {
        self.leaders.iter().copied().min()
    }
}

pub fn tally(options: &[OptionTally]) -> Tally {
    let mut max_votes = -1;
    let mut leaders = Vec::new();

    for option in options {
        if option.vote_count > max_votes {
            max_votes = option.vote_count;
            leaders.clear();
            leaders.push(option.id);
        } else if option.vote_count == max_votes {
            leaders.push(option.id);
        }
    }

    Tally { max_votes, leaders }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResult {
    pub poll_id: i64,
    pub applied: bool,
    pub winner_id: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClosureReport {
    pub closed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Closes expired polls and tells the trip about the result.
pub struct PollClosureEngine {
    store: Arc<dyn Store>,
    notifier: Arc<NotificationService>,
}

impl PollClosureEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<NotificationService>) -> Self {
        Self { store, notifier }
    }

    /// Closes every ACTIVE poll that expired before `now`.
    ///
    /// Only the initial lookup can fail the run; each poll is closed independently and
    /// a failure on one is logged and counted.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ClosureReport, StoreError> {
        let expired = self.store.find_expired_active_polls(now).await?;
        let mut report = ClosureReport::default();

        for snapshot in &expired {
            match self.close(snapshot, now).await {
                Ok(result) if result.applied => report.closed += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(poll_id = snapshot.poll.id, error = %e, "failed to close poll");
                }
            }
        }

        if !expired.is_empty() {
            tracing::info!(
                expired = expired.len(),
                closed = report.closed,
                skipped = report.skipped,
                failed = report.failed,
                "poll closure run finished"
            );
        }
        Ok(report)
    }

    /// Closes an ACTIVE poll right away, regardless of its expiry.
    /// Returns `None` if there is no ACTIVE poll with that id.
    pub async fn close_now(
        &self,
        poll_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<PollResult>, StoreError> {
        match self.store.find_active_poll(poll_id).await? {
            Some(snapshot) => Ok(Some(self.close(&snapshot, now).await?)),
            None => Ok(None),
        }
    }

    async fn close(&self, snapshot: &PollSnapshot, now: DateTime<Utc>) -> Result<PollResult, StoreError> {
        let poll = &snapshot.poll;
        let tally = tally(&snapshot.options);
        let winner_id = tally.winner();

        if tally.leaders.len() > 1 {
            tracing::debug!(
                poll_id = poll.id,
                max_votes = tally.max_votes,
                leaders = ?tally.leaders,
                "tie broken by lowest option id"
            );
        }

        let closure = PollClosure {
            poll_id: poll.id,
            // TIE is never written here, even when options tie for the lead.
            status: PollStatus::Completed,
            winner_id,
            completed_at: now,
            tally: snapshot.options.clone(),
        };

        let outcome = self.store.close_poll_if_active(&closure).await?;
        match outcome {
            CloseOutcome::Applied => {
                tracing::info!(poll_id = poll.id, trip_id = poll.trip_id, ?winner_id, "poll closed");
                self.notifier
                    .notify_users(completion_notice(snapshot, winner_id))
                    .await;
            }
            CloseOutcome::AlreadyClosed => {
                tracing::debug!(poll_id = poll.id, "poll already closed, skipping");
            }
            CloseOutcome::StaleTally => {
                tracing::info!(poll_id = poll.id, "votes changed while closing, retrying next tick");
            }
        }

        let applied = outcome == CloseOutcome::Applied;
        Ok(PollResult {
            poll_id: poll.id,
            applied,
            // Only report a winner that was actually written.
            winner_id: winner_id.filter(|_| applied),
        })
    }
}

fn completion_notice(snapshot: &PollSnapshot, winner_id: Option<i64>) -> NotificationRequest {
    let poll = &snapshot.poll;
    let winner = winner_id.and_then(|id| snapshot.options.iter().find(|o| o.id == id));

    let message = match winner {
        Some(option) => format!(
            "Voting on \"{}\" has ended. Winner: {}",
            poll.question, option.option
        ),
        None => format!("Voting on \"{}\" has ended.", poll.question),
    };

    NotificationRequest {
        user_ids: snapshot.member_ids.clone(),
        trip_id: poll.trip_id,
        notification_type: NotificationType::PollCompleted,
        related_id: Some(poll.id),
        title: "Poll closed".to_string(),
        message,
        payload: Some(json!({
            "pollId": poll.id,
            "winnerId": winner_id,
            "status": PollStatus::Completed.as_str(),
        })),
        channel: Channel::InApp,
        send_at: None,
    }
}
