//! API errors and how they map onto HTTP statuses
//!
//! Every error answers with `{"error": "<message>"}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::scheduler::SchedulerError;
use crate::sentinel::SentinelError;
use crate::storage::StorageError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),

    NotFound(String),

    /// Shutting down, or the repository is temporarily unreachable
    Unavailable(String),

    /// Any other repository failure
    Storage(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Storage(msg) => {
                warn!("request failed on storage: {}", msg);
                msg
            }
            ApiError::InvalidRequest(msg) | ApiError::NotFound(msg) | ApiError::Unavailable(msg) => {
                msg
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            ApiError::Unavailable(err.to_string())
        } else {
            ApiError::Storage(err.to_string())
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Storage(err) => err.into(),
            SchedulerError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SchedulerError::InvalidMonitor(_) | SchedulerError::InvalidSchedule(_) => {
                ApiError::InvalidRequest(err.to_string())
            }
        }
    }
}

impl From<SentinelError> for ApiError {
    fn from(err: SentinelError) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}
