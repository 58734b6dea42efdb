// error.rs
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("poll {0} not found")]
    PollNotFound(i64),

    #[error("poll {0} is closed")]
    PollClosed(i64),

    #[error("option {option_id} does not belong to poll {poll_id}")]
    OptionNotInPoll { poll_id: i64, option_id: i64 },

    #[error("user {user_id} is not a member of trip {trip_id}")]
    NotTripMember { trip_id: i64, user_id: i64 },
}

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no active poll with id {0}")]
    NoActivePoll(i64),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NoActivePoll(_) => StatusCode::NOT_FOUND,
            AppError::Store(err) => match err {
                StoreError::PollNotFound(_) => StatusCode::NOT_FOUND,
                StoreError::PollClosed(_) => StatusCode::CONFLICT,
                StoreError::OptionNotInPoll { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                StoreError::NotTripMember { .. } => StatusCode::FORBIDDEN,
                StoreError::Database(_) | StoreError::Migrate(_) | StoreError::Decode(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
