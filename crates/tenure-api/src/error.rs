//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use tenure_core::Error as CoreError;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Engine(#[from] CoreError),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    let ApiError::Engine(e) = self else {
      return StatusCode::BAD_REQUEST;
    };
    match e {
      CoreError::BatchRejected(_) | CoreError::InvalidRecord(_) => {
        StatusCode::UNPROCESSABLE_ENTITY
      }
      CoreError::UnknownEntity(_) => StatusCode::NOT_FOUND,
      CoreError::ConcurrencyConflict(_) | CoreError::EntityConflict(_) => StatusCode::CONFLICT,
      CoreError::NotVersioned { .. }
      | CoreError::MissingBusinessKey(_)
      | CoreError::InvalidIdentifier { .. }
      | CoreError::DuplicateColumn { .. }
      | CoreError::ReservedColumn { .. }
      | CoreError::TrackedKeyColumn { .. }
      | CoreError::InvalidColumnType(_) => StatusCode::BAD_REQUEST,
      CoreError::AllocatorExhausted(_) | CoreError::Storage(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    let body = match &self {
      ApiError::Engine(CoreError::BatchRejected(report)) => json!({
        "error":    self.to_string(),
        "rejected": report.rejected,
      }),
      ApiError::Engine(CoreError::InvalidRecord(record)) => json!({
        "error":  self.to_string(),
        "record": record,
      }),
      ApiError::Engine(e) => json!({
        "error":     e.to_string(),
        "retryable": e.is_retryable(),
      }),
      ApiError::BadRequest(m) => json!({ "error": m }),
    };
    (status, Json(body)).into_response()
  }
}
