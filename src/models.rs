// models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Lifecycle of a poll. `Active` moves to a terminal status exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollStatus {
    Active,
    Completed,
    /// Part of the data model, never written by the closure path.
    Tie,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Active => "ACTIVE",
            PollStatus::Completed => "COMPLETED",
            PollStatus::Tie => "TIE",
        }
    }
}

impl FromStr for PollStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(PollStatus::Active),
            "COMPLETED" => Ok(PollStatus::Completed),
            "TIE" => Ok(PollStatus::Tie),
            other => Err(StoreError::Decode(format!("unknown poll status {other:?}"))),
        }
    }
}

/// Kind of notification. Other services share the notification tables, so kinds this
/// crate doesn't produce are carried through verbatim as `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationType {
    PollCreated,
    PollCompleted,
    Reminder,
    Other(String),
}

impl NotificationType {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::PollCreated => "POLL_CREATED",
            NotificationType::PollCompleted => "POLL_COMPLETED",
            NotificationType::Reminder => "REMINDER",
            NotificationType::Other(kind) => kind,
        }
    }
}

impl From<String> for NotificationType {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "POLL_CREATED" => NotificationType::PollCreated,
            "POLL_COMPLETED" => NotificationType::PollCompleted,
            "REMINDER" => NotificationType::Reminder,
            _ => NotificationType::Other(kind),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NotificationType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    #[default]
    InApp,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::InApp => "IN_APP",
            Channel::Email => "EMAIL",
        }
    }
}

impl FromStr for Channel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_APP" => Ok(Channel::InApp),
            "EMAIL" => Ok(Channel::Email),
            other => Err(StoreError::Decode(format!("unknown channel {other:?}"))),
        }
    }
}

/// A notification deferred until `send_at`, delivered once by the dispatch engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledNotification {
    pub id: i64,
    pub target_user_id: i64,
    pub trip_id: i64,
    pub notification_type: NotificationType,
    pub related_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub payload: Option<Value>,
    pub channel: Channel,
    pub send_at: DateTime<Utc>,
    pub is_sent: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub trip_id: Option<i64>,
    pub notification_type: NotificationType,
    pub related_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub payload: Option<Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Row to insert into `notifications`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: i64,
    pub trip_id: Option<i64>,
    pub notification_type: NotificationType,
    pub related_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub payload: Option<Value>,
}

impl From<&ScheduledNotification> for NewNotification {
    fn from(scheduled: &ScheduledNotification) -> Self {
        Self {
            user_id: scheduled.target_user_id,
            trip_id: Some(scheduled.trip_id),
            notification_type: scheduled.notification_type.clone(),
            related_id: scheduled.related_id,
            title: scheduled.title.clone(),
            message: scheduled.message.clone(),
            payload: scheduled.payload.clone(),
        }
    }
}

/// Row to insert into `scheduled_notifications`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduledNotification {
    pub target_user_id: i64,
    pub trip_id: i64,
    pub notification_type: NotificationType,
    pub related_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub payload: Option<Value>,
    pub channel: Channel,
    pub send_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Poll {
    pub id: i64,
    pub trip_id: i64,
    pub question: String,
    pub status: PollStatus,
    pub expires_at: DateTime<Utc>,
    pub created_by_id: i64,
    pub winner_id: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A poll option together with the number of votes referencing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionTally {
    pub id: i64,
    pub option: String,
    pub vote_count: i64,
}

/// An ACTIVE poll as read for closing: options in retrieval order, and the trip's members.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSnapshot {
    pub poll: Poll,
    pub options: Vec<OptionTally>,
    pub member_ids: Vec<i64>,
}

/// Conditional ACTIVE -> terminal transition, carrying the tally it was decided on.
#[derive(Debug, Clone, PartialEq)]
pub struct PollClosure {
    pub poll_id: i64,
    pub status: PollStatus,
    pub winner_id: Option<i64>,
    pub completed_at: DateTime<Utc>,
    pub tally: Vec<OptionTally>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Applied,
    /// The poll was no longer ACTIVE at write time.
    AlreadyClosed,
    /// Votes changed between the read and the write; retried on the next tick.
    StaleTally,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub poll_id: i64,
    pub user_id: i64,
    pub poll_option_id: i64,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewVote {
    pub poll_id: i64,
    pub user_id: i64,
    pub poll_option_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub user_id: i64,
    pub poll_option_id: i64,
}
