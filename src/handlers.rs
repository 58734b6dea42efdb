// handlers.rs
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::clock::Clock;
use crate::error::AppError;
use crate::models::{NewVote, Vote, VoteRequest};
use crate::poll::{PollClosureEngine, PollResult};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub closure: Arc<PollClosureEngine>,
    pub clock: Arc<dyn Clock>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Cast or change a vote on an open poll.
pub async fn vote(
    State(state): State<AppState>,
    Path(poll_id): Path<i64>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<Vote>, AppError> {
    let vote = NewVote {
        poll_id,
        user_id: request.user_id,
        poll_option_id: request.poll_option_id,
    };
    let recorded = state.store.cast_vote(&vote, state.clock.now()).await?;
    tracing::info!(poll_id, user_id = vote.user_id, option_id = vote.poll_option_id, "vote recorded");
    Ok(Json(recorded))
}

/// Close a poll before it expires.
pub async fn close_poll(
    State(state): State<AppState>,
    Path(poll_id): Path<i64>,
) -> Result<Json<PollResult>, AppError> {
    state
        .closure
        .close_now(poll_id, state.clock.now())
        .await?
        .map(Json)
        .ok_or(AppError::NoActivePoll(poll_id))
}
