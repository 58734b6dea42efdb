// src/store/memory.rs
//! In-memory [`Store`] used by the unit tests, with hooks to inject failures.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::Store;
use crate::error::StoreError;
use crate::models::{
    CloseOutcome, NewNotification, NewScheduledNotification, NewVote, Notification, OptionTally,
    Poll, PollClosure, PollSnapshot, PollStatus, ScheduledNotification, Vote,
};

#[derive(Default)]
struct State {
    next_id: i64,
    scheduled: Vec<ScheduledNotification>,
    notifications: Vec<Notification>,
    polls: Vec<Poll>,
    options: Vec<(i64, OptionTally)>,
    votes: Vec<Vote>,
    members: HashMap<i64, Vec<i64>>,
    fail_notification_inserts: bool,
    fail_scheduled_inserts: bool,
    fail_close_for: HashSet<i64>,
    fail_find_due: bool,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tally(&self, poll_id: i64) -> Vec<OptionTally> {
        self.options
            .iter()
            .filter(|(owner, _)| *owner == poll_id)
            .map(|(_, option)| OptionTally {
                vote_count: self
                    .votes
                    .iter()
                    .filter(|v| v.poll_id == poll_id && v.poll_option_id == option.id)
                    .count() as i64,
                ..option.clone()
            })
            .collect()
    }

    fn snapshot(&self, poll: &Poll) -> PollSnapshot {
        PollSnapshot {
            poll: poll.clone(),
            options: self.tally(poll.id),
            member_ids: self.members.get(&poll.trip_id).cloned().unwrap_or_default(),
        }
    }

    fn push_notifications(&mut self, records: &[NewNotification], created_at: DateTime<Utc>) {
        for record in records {
            let id = self.next_id();
            self.notifications.push(Notification {
                id,
                user_id: record.user_id,
                trip_id: record.trip_id,
                notification_type: record.notification_type.clone(),
                related_id: record.related_id,
                title: record.title.clone(),
                message: record.message.clone(),
                payload: record.payload.clone(),
                is_read: false,
                created_at,
                read_at: None,
            });
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, trip_id: i64, user_id: i64) {
        self.state.lock().await.members.entry(trip_id).or_default().push(user_id);
    }

    /// Creates an ACTIVE poll with the given options and returns the poll id.
    pub async fn add_poll(&self, trip_id: i64, question: &str, expires_at: DateTime<Utc>) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.polls.push(Poll {
            id,
            trip_id,
            question: question.to_string(),
            status: PollStatus::Active,
            expires_at,
            created_by_id: 1,
            winner_id: None,
            completed_at: None,
        });
        id
    }

    /// Adds an option with an explicit id, so tests control the tie-break order.
    pub async fn add_option(&self, poll_id: i64, option_id: i64, text: &str) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(option_id);
        state.options.push((
            poll_id,
            OptionTally {
                id: option_id,
                option: text.to_string(),
                vote_count: 0,
            },
        ));
    }

    /// Inserts a vote directly, bypassing the checks in `cast_vote`.
    pub async fn add_votes(&self, poll_id: i64, option_id: i64, count: usize) {
        let mut state = self.state.lock().await;
        for _ in 0..count {
            let user_id = state.next_id();
            state.votes.push(Vote {
                poll_id,
                user_id,
                poll_option_id: option_id,
                voted_at: Utc::now(),
            });
        }
    }

    pub async fn add_scheduled(&self, record: NewScheduledNotification) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.scheduled.push(scheduled_row(id, record));
        id
    }

    pub async fn poll(&self, poll_id: i64) -> Option<Poll> {
        self.state.lock().await.polls.iter().find(|p| p.id == poll_id).cloned()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }

    pub async fn scheduled(&self) -> Vec<ScheduledNotification> {
        self.state.lock().await.scheduled.clone()
    }

    pub async fn set_fail_notification_inserts(&self, fail: bool) {
        self.state.lock().await.fail_notification_inserts = fail;
    }

    pub async fn set_fail_scheduled_inserts(&self, fail: bool) {
        self.state.lock().await.fail_scheduled_inserts = fail;
    }

    pub async fn set_fail_find_due(&self, fail: bool) {
        self.state.lock().await.fail_find_due = fail;
    }

    pub async fn fail_close_for(&self, poll_id: i64) {
        self.state.lock().await.fail_close_for.insert(poll_id);
    }
}

fn scheduled_row(id: i64, record: NewScheduledNotification) -> ScheduledNotification {
    ScheduledNotification {
        id,
        target_user_id: record.target_user_id,
        trip_id: record.trip_id,
        notification_type: record.notification_type,
        related_id: record.related_id,
        title: record.title,
        message: record.message,
        payload: record.payload,
        channel: record.channel,
        send_at: record.send_at,
        is_sent: false,
        created_at: Utc::now(),
    }
}

fn injected() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_due_scheduled_notifications(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledNotification>, StoreError> {
        let state = self.state.lock().await;
        if state.fail_find_due {
            return Err(injected());
        }
        let mut due: Vec<_> = state
            .scheduled
            .iter()
            .filter(|s| !s.is_sent && s.send_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|s| (s.send_at, s.id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim_and_deliver(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledNotification>, StoreError> {
        let mut state = self.state.lock().await;
        let claimable: Vec<usize> = state
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, s)| ids.contains(&s.id) && !s.is_sent && s.send_at <= now)
            .map(|(i, _)| i)
            .collect();

        // Deliver before marking so a failed insert leaves nothing claimed.
        if state.fail_notification_inserts && !claimable.is_empty() {
            return Err(injected());
        }

        let mut claimed = Vec::with_capacity(claimable.len());
        for i in claimable {
            state.scheduled[i].is_sent = true;
            claimed.push(state.scheduled[i].clone());
        }
        let records: Vec<NewNotification> = claimed.iter().map(NewNotification::from).collect();
        state.push_notifications(&records, now);
        Ok(claimed)
    }

    async fn insert_notifications(&self, records: &[NewNotification]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        if state.fail_notification_inserts {
            return Err(injected());
        }
        state.push_notifications(records, Utc::now());
        Ok(records.len() as u64)
    }

    async fn insert_scheduled_notifications(
        &self,
        records: &[NewScheduledNotification],
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        if state.fail_scheduled_inserts {
            return Err(injected());
        }
        for record in records {
            let id = state.next_id();
            state.scheduled.push(scheduled_row(id, record.clone()));
        }
        Ok(records.len() as u64)
    }

    async fn find_expired_active_polls(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PollSnapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .polls
            .iter()
            .filter(|p| p.status == PollStatus::Active && p.expires_at < now)
            .map(|p| state.snapshot(p))
            .collect())
    }

    async fn find_active_poll(&self, poll_id: i64) -> Result<Option<PollSnapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .polls
            .iter()
            .find(|p| p.id == poll_id && p.status == PollStatus::Active)
            .map(|p| state.snapshot(p)))
    }

    async fn close_poll_if_active(&self, closure: &PollClosure) -> Result<CloseOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if state.fail_close_for.contains(&closure.poll_id) {
            return Err(injected());
        }

        let current = state.tally(closure.poll_id);
        let Some(poll) = state.polls.iter_mut().find(|p| p.id == closure.poll_id) else {
            return Ok(CloseOutcome::AlreadyClosed);
        };
        if poll.status != PollStatus::Active {
            return Ok(CloseOutcome::AlreadyClosed);
        }
        if current != closure.tally {
            return Ok(CloseOutcome::StaleTally);
        }

        poll.status = closure.status;
        poll.winner_id = closure.winner_id;
        poll.completed_at = Some(closure.completed_at);
        Ok(CloseOutcome::Applied)
    }

    async fn cast_vote(&self, vote: &NewVote, now: DateTime<Utc>) -> Result<Vote, StoreError> {
        let mut state = self.state.lock().await;
        let poll = state
            .polls
            .iter()
            .find(|p| p.id == vote.poll_id)
            .cloned()
            .ok_or(StoreError::PollNotFound(vote.poll_id))?;

        if poll.status != PollStatus::Active || poll.expires_at <= now {
            return Err(StoreError::PollClosed(poll.id));
        }
        if !state
            .options
            .iter()
            .any(|(owner, o)| *owner == poll.id && o.id == vote.poll_option_id)
        {
            return Err(StoreError::OptionNotInPoll {
                poll_id: poll.id,
                option_id: vote.poll_option_id,
            });
        }
        let is_member = state
            .members
            .get(&poll.trip_id)
            .is_some_and(|m| m.contains(&vote.user_id));
        if !is_member {
            return Err(StoreError::NotTripMember {
                trip_id: poll.trip_id,
                user_id: vote.user_id,
            });
        }

        let recorded = Vote {
            poll_id: vote.poll_id,
            user_id: vote.user_id,
            poll_option_id: vote.poll_option_id,
            voted_at: now,
        };
        state
            .votes
            .retain(|v| !(v.poll_id == vote.poll_id && v.user_id == vote.user_id));
        state.votes.push(recorded.clone());
        Ok(recorded)
    }
}
