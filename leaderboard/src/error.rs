use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures talking to the backing store. Always transient from the
/// pipeline's point of view: processing aborts without advancing the
/// checkpoint and the affected events are replayed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store command failed: {0}")]
    Command(#[from] redis::RedisError),
    #[error("store command timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error("failed to encode record: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An event that failed schema validation. Replay cannot fix these, so
/// they are logged, counted and skipped; the checkpoint still advances.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventError {
    #[error("event is missing required field {0}")]
    MissingField(&'static str),
    #[error("unknown event type {0:?}")]
    UnknownType(String),
    #[error("negative points value {0}")]
    NegativePoints(i64),
}

/// Read-side failures, mapped onto HTTP statuses at the API edge.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("store unavailable, try again later")]
    StoreUnavailable(#[from] StoreError),
    #[error("player not found")]
    PlayerNotFound,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        match self {
            QueryError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            QueryError::PlayerNotFound => (StatusCode::NOT_FOUND, self.to_string()),
        }
        .into_response()
    }
}
