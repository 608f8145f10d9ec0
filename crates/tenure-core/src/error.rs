//! Error types for `tenure-core`.

use thiserror::Error;

use crate::{
  batch::{BatchReport, RecordError},
  entity::EntityType,
};

#[derive(Debug, Error)]
pub enum Error {
  /// One or more rows failed validation; nothing was written.
  #[error("{0}")]
  BatchRejected(BatchReport),

  /// A single record (such as a history lookup key) failed validation.
  #[error(transparent)]
  InvalidRecord(#[from] RecordError),

  #[error("entity not found: {0}")]
  UnknownEntity(String),

  #[error("entity {entity} is a {found}, versioning requires type2_dimension")]
  NotVersioned { entity: String, found: EntityType },

  #[error("type 2 dimension {0} must have at least one business key")]
  MissingBusinessKey(String),

  #[error("invalid {kind} {name:?}: {reason}")]
  InvalidIdentifier {
    kind:   &'static str,
    name:   String,
    reason: &'static str,
  },

  #[error("duplicate column {column:?} in entity {entity}")]
  DuplicateColumn { entity: String, column: String },

  #[error("column {column:?} in entity {entity} uses a reserved name")]
  ReservedColumn { entity: String, column: String },

  #[error(
    "column {column:?} in entity {entity} cannot be both a business key and tracked"
  )]
  TrackedKeyColumn { entity: String, column: String },

  #[error("unsupported column type: {0:?}")]
  InvalidColumnType(String),

  #[error("entity {0} is already registered with a different definition")]
  EntityConflict(String),

  /// The entity lock or storage transaction could not be obtained, or a
  /// concurrent writer changed the current rows. Retry the whole batch.
  #[error("concurrency conflict on entity {0}; retry the batch")]
  ConcurrencyConflict(String),

  #[error("surrogate key space exhausted for entity {0}")]
  AllocatorExhausted(String),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a backend-specific error.
  pub fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Storage(Box::new(e))
  }

  /// Whether the caller may resubmit the same batch unchanged.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::ConcurrencyConflict(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
