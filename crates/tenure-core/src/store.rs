//! The `DimensionStore` trait and the change set it commits.
//!
//! The trait is implemented by storage backends ([`MemoryStore`] here,
//! `tenure-store-sqlite` for persistence). The engine depends on this
//! abstraction only.
//!
//! [`MemoryStore`]: crate::memory::MemoryStore

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  allocator::SurrogateKey,
  entity::{Dimension, EntityMeta},
  key::BusinessKey,
  value::Record,
  version::VersionRow,
};

// ─── Change set ──────────────────────────────────────────────────────────────

/// Close the current row `surrogate_key` of `business_key` at `valid_to`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Closure {
  pub surrogate_key: SurrogateKey,
  pub business_key:  BusinessKey,
  pub valid_to:      DateTime<Utc>,
}

/// Overwrite untracked columns of the current row `surrogate_key`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Refresh {
  pub surrogate_key: SurrogateKey,
  pub business_key:  BusinessKey,
  pub attributes:    Record,
}

/// Everything one batch writes. Committed atomically or not at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
  pub entity:             String,
  pub closures:           Vec<Closure>,
  /// New version rows. Rows superseded within the same batch arrive already
  /// closed.
  pub inserts:            Vec<VersionRow>,
  pub refreshes:          Vec<Refresh>,
  /// Highest surrogate key issued so far, persisted so keys are never
  /// reissued.
  pub last_surrogate_key: Option<SurrogateKey>,
}

impl ChangeSet {
  pub fn new(entity: impl Into<String>) -> Self {
    Self {
      entity:             entity.into(),
      closures:           Vec::new(),
      inserts:            Vec::new(),
      refreshes:          Vec::new(),
      last_surrogate_key: None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.closures.is_empty() && self.inserts.is_empty() && self.refreshes.is_empty()
  }
}

/// Row counts written by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitAck {
  pub closed:    usize,
  pub inserted:  usize,
  pub refreshed: usize,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a dimension storage backend.
///
/// Version rows are append-only. The only updates a backend performs are the
/// closures and refreshes of a [`ChangeSet`].
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait DimensionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  // ── Metadata ──────────────────────────────────────────────────────────

  /// Persist an entity definition, creating its table when it is a
  /// `type2_dimension`. Returns `false` if an identical definition was
  /// already registered; a different one fails with
  /// [`Error::EntityConflict`](crate::Error::EntityConflict).
  fn register_entity(
    &self,
    meta: EntityMeta,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn entity<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<EntityMeta>, Self::Error>> + Send + 'a;

  fn list_entities(
    &self,
  ) -> impl Future<Output = Result<Vec<EntityMeta>, Self::Error>> + Send + '_;

  // ── Versioning ────────────────────────────────────────────────────────

  /// Current rows for the given business keys. Keys with no current row are
  /// simply absent from the result.
  fn read_current_rows<'a>(
    &'a self,
    dimension: &'a Dimension,
    keys: &'a [BusinessKey],
  ) -> impl Future<Output = Result<Vec<VersionRow>, Self::Error>> + Send + 'a;

  /// The highest surrogate key ever issued for the dimension.
  fn last_surrogate_key<'a>(
    &'a self,
    dimension: &'a Dimension,
  ) -> impl Future<Output = Result<Option<SurrogateKey>, Self::Error>> + Send + 'a;

  /// Apply a change set in one transaction.
  ///
  /// Fails with [`Error::ConcurrencyConflict`](crate::Error::ConcurrencyConflict)
  /// and writes nothing if a closure or refresh does not match a current row,
  /// or if an insert would leave two current rows for one key.
  fn commit<'a>(
    &'a self,
    dimension: &'a Dimension,
    changes: ChangeSet,
  ) -> impl Future<Output = Result<CommitAck, Self::Error>> + Send + 'a;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Every version of one member, ordered by `valid_from` then surrogate key.
  fn history<'a>(
    &'a self,
    dimension: &'a Dimension,
    key: &'a BusinessKey,
  ) -> impl Future<Output = Result<Vec<VersionRow>, Self::Error>> + Send + 'a;

  /// The current version of every member, ordered by surrogate key.
  fn current_rows<'a>(
    &'a self,
    dimension: &'a Dimension,
  ) -> impl Future<Output = Result<Vec<VersionRow>, Self::Error>> + Send + 'a;

  /// Rows valid at `at`, ordered by surrogate key.
  fn as_of<'a>(
    &'a self,
    dimension: &'a Dimension,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<VersionRow>, Self::Error>> + Send + 'a;
}
