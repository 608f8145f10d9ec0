//! Error type for `tenure-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tenure_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored value does not match its declared column type.
  #[error("cannot decode column {column:?}: {reason}")]
  Decode { column: String, reason: String },

  /// A closure or refresh matched no current row, or an insert collided
  /// with an existing current row or surrogate key.
  #[error("stale write to {0}")]
  Conflict(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for tenure_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(e) => e,
      Error::Conflict(entity) => Self::ConcurrencyConflict(entity),
      other => Self::storage(other),
    }
  }
}
