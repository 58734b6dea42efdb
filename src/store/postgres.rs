// src/store/postgres.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::Store;
use crate::error::StoreError;
use crate::models::{
    CloseOutcome, NewNotification, NewScheduledNotification, NewVote, OptionTally, Poll,
    PollClosure, PollSnapshot, PollStatus, ScheduledNotification, Vote,
};

const SCHEDULED_COLUMNS: &str = "id, target_user_id, trip_id, type AS notification_type, \
     related_id, title, message, payload, channel, send_at, is_sent, created_at";

const POLL_COLUMNS: &str =
    "id, trip_id, question, status, expires_at, created_by_id, winner_id, completed_at";

#[derive(sqlx::FromRow)]
struct ScheduledRow {
    id: i64,
    target_user_id: i64,
    trip_id: i64,
    notification_type: String,
    related_id: Option<i64>,
    title: String,
    message: String,
    payload: Option<Value>,
    channel: String,
    send_at: DateTime<Utc>,
    is_sent: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ScheduledRow> for ScheduledNotification {
    type Error = StoreError;

    fn try_from(row: ScheduledRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            target_user_id: row.target_user_id,
            trip_id: row.trip_id,
            notification_type: row.notification_type.into(),
            related_id: row.related_id,
            title: row.title,
            message: row.message,
            payload: row.payload,
            channel: row.channel.parse()?,
            send_at: row.send_at,
            is_sent: row.is_sent,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PollRow {
    id: i64,
    trip_id: i64,
    question: String,
    status: String,
    expires_at: DateTime<Utc>,
    created_by_id: i64,
    winner_id: Option<i64>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PollRow> for Poll {
    type Error = StoreError;

    fn try_from(row: PollRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            trip_id: row.trip_id,
            question: row.question,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            created_by_id: row.created_by_id,
            winner_id: row.winner_id,
            completed_at: row.completed_at,
        })
    }
}

/// Postgres-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches options (with vote counts) and trip members to each poll.
    async fn load_snapshots(&self, rows: Vec<PollRow>) -> Result<Vec<PollSnapshot>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let poll_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let trip_ids: Vec<i64> = rows.iter().map(|r| r.trip_id).collect();

        let option_rows = sqlx::query_as::<_, (i64, i64, String, i64)>(
            r#"
            SELECT o.poll_id, o.id, o.option, COUNT(v.user_id) AS vote_count
            FROM poll_options o
            LEFT JOIN votes v ON v.poll_option_id = o.id AND v.poll_id = o.poll_id
            WHERE o.poll_id = ANY($1)
            GROUP BY o.poll_id, o.id, o.option
            ORDER BY o.poll_id, o.id
            "#,
        )
        .bind(&poll_ids)
        .fetch_all(&self.pool)
        .await?;

        let member_rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT trip_id, user_id FROM trip_members WHERE trip_id = ANY($1) ORDER BY trip_id, user_id",
        )
        .bind(&trip_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut options: HashMap<i64, Vec<OptionTally>> = HashMap::new();
        for (poll_id, id, option, vote_count) in option_rows {
            options.entry(poll_id).or_default().push(OptionTally {
                id,
                option,
                vote_count,
            });
        }

        let mut members: HashMap<i64, Vec<i64>> = HashMap::new();
        for (trip_id, user_id) in member_rows {
            members.entry(trip_id).or_default().push(user_id);
        }

        rows.into_iter()
            .map(|row| -> Result<PollSnapshot, StoreError> {
                let poll = Poll::try_from(row)?;
                Ok(PollSnapshot {
                    options: options.remove(&poll.id).unwrap_or_default(),
                    member_ids: members.get(&poll.trip_id).cloned().unwrap_or_default(),
                    poll,
                })
            })
            .collect()
    }
}

async fn insert_notification_rows(
    conn: &mut PgConnection,
    records: &[NewNotification],
) -> Result<u64, sqlx::Error> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO notifications (user_id, trip_id, type, related_id, title, message, payload) ",
    );
    builder.push_values(records, |mut row, record| {
        row.push_bind(record.user_id)
            .push_bind(record.trip_id)
            .push_bind(record.notification_type.as_str())
            .push_bind(record.related_id)
            .push_bind(&record.title)
            .push_bind(&record.message)
            .push_bind(&record.payload);
    });

    let result = builder.build().execute(conn).await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl Store for PgStore {
    async fn find_due_scheduled_notifications(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ScheduledNotification>, StoreError> {
        let rows = sqlx::query_as::<_, ScheduledRow>(&format!(
            "SELECT {SCHEDULED_COLUMNS} FROM scheduled_notifications \
             WHERE is_sent = FALSE AND send_at <= $1 \
             ORDER BY send_at, id \
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScheduledNotification::try_from).collect()
    }

    async fn claim_and_deliver(
        &self,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledNotification>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        // Row locks make a concurrent claimer wait, then re-check is_sent and skip.
        let rows = sqlx::query_as::<_, ScheduledRow>(&format!(
            "UPDATE scheduled_notifications SET is_sent = TRUE \
             WHERE id = ANY($1) AND is_sent = FALSE AND send_at <= $2 \
             RETURNING {SCHEDULED_COLUMNS}"
        ))
        .bind(ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let claimed = rows
            .into_iter()
            .map(ScheduledNotification::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let records: Vec<NewNotification> = claimed.iter().map(NewNotification::from).collect();
        insert_notification_rows(&mut tx, &records).await?;

        tx.commit().await?;
        Ok(claimed)
    }

    async fn insert_notifications(&self, records: &[NewNotification]) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(insert_notification_rows(&mut conn, records).await?)
    }

    async fn insert_scheduled_notifications(
        &self,
        records: &[NewScheduledNotification],
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO scheduled_notifications \
             (target_user_id, trip_id, type, related_id, title, message, payload, channel, send_at) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.target_user_id)
                .push_bind(record.trip_id)
                .push_bind(record.notification_type.as_str())
                .push_bind(record.related_id)
                .push_bind(&record.title)
                .push_bind(&record.message)
                .push_bind(&record.payload)
                .push_bind(record.channel.as_str())
                .push_bind(record.send_at);
        });

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn find_expired_active_polls(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PollSnapshot>, StoreError> {
        let rows = sqlx::query_as::<_, PollRow>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls \
             WHERE status = 'ACTIVE' AND expires_at < $1 \
             ORDER BY expires_at, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        self.load_snapshots(rows).await
    }

    async fn find_active_poll(&self, poll_id: i64) -> Result<Option<PollSnapshot>, StoreError> {
        let row = sqlx::query_as::<_, PollRow>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE id = $1 AND status = 'ACTIVE'"
        ))
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.load_snapshots(vec![row]).await?.pop())
    }

    async fn close_poll_if_active(&self, closure: &PollClosure) -> Result<CloseOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes with cast_vote, which locks the same row.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM polls WHERE id = $1 FOR UPDATE")
                .bind(closure.poll_id)
                .fetch_optional(&mut *tx)
                .await?;

        if status.as_deref() != Some(PollStatus::Active.as_str()) {
            return Ok(CloseOutcome::AlreadyClosed);
        }

        let current = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT o.id, COUNT(v.user_id) AS vote_count
            FROM poll_options o
            LEFT JOIN votes v ON v.poll_option_id = o.id AND v.poll_id = o.poll_id
            WHERE o.poll_id = $1
            GROUP BY o.id
            ORDER BY o.id
            "#,
        )
        .bind(closure.poll_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut expected: Vec<(i64, i64)> =
            closure.tally.iter().map(|o| (o.id, o.vote_count)).collect();
        expected.sort_unstable();

        if current != expected {
            return Ok(CloseOutcome::StaleTally);
        }

        let result = sqlx::query(
            "UPDATE polls SET status = $2, winner_id = $3, completed_at = $4 \
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(closure.poll_id)
        .bind(closure.status.as_str())
        .bind(closure.winner_id)
        .bind(closure.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if result.rows_affected() == 1 {
            Ok(CloseOutcome::Applied)
        } else {
            Ok(CloseOutcome::AlreadyClosed)
        }
    }

    async fn cast_vote(&self, vote: &NewVote, now: DateTime<Utc>) -> Result<Vote, StoreError> {
        let mut tx = self.pool.begin().await?;

        let poll = sqlx::query_as::<_, (i64, String, DateTime<Utc>)>(
            "SELECT trip_id, status, expires_at FROM polls WHERE id = $1 FOR UPDATE",
        )
        .bind(vote.poll_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((trip_id, status, expires_at)) = poll else {
            return Err(StoreError::PollNotFound(vote.poll_id));
        };

        if status.parse::<PollStatus>()? != PollStatus::Active || expires_at <= now {
            return Err(StoreError::PollClosed(vote.poll_id));
        }

        let option_in_poll: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM poll_options WHERE id = $1 AND poll_id = $2)",
        )
        .bind(vote.poll_option_id)
        .bind(vote.poll_id)
        .fetch_one(&mut *tx)
        .await?;

        if !option_in_poll {
            return Err(StoreError::OptionNotInPoll {
                poll_id: vote.poll_id,
                option_id: vote.poll_option_id,
            });
        }

        let is_member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM trip_members WHERE trip_id = $1 AND user_id = $2)",
        )
        .bind(trip_id)
        .bind(vote.user_id)
        .fetch_one(&mut *tx)
        .await?;

        if !is_member {
            return Err(StoreError::NotTripMember {
                trip_id,
                user_id: vote.user_id,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO votes (poll_id, user_id, poll_option_id, voted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (poll_id, user_id) DO UPDATE
            SET poll_option_id = EXCLUDED.poll_option_id,
                voted_at = EXCLUDED.voted_at
            "#,
        )
        .bind(vote.poll_id)
        .bind(vote.user_id)
        .bind(vote.poll_option_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Vote {
            poll_id: vote.poll_id,
            user_id: vote.user_id,
            poll_option_id: vote.poll_option_id,
            voted_at: now,
        })
    }
}
