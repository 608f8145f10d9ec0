//! The versioning engine.
//!
//! [`VersioningEngine::apply`] turns an incoming snapshot into the minimal set
//! of closures and inserts that keeps a dimension's full history:
//!
//! 1. validate every row (key, types, nullability) and reject the batch on any
//!    failure;
//! 2. take the entity lock and read the current rows of the touched keys;
//! 3. classify each row and plan per-key actions;
//! 4. allocate surrogate keys and commit the change set in one transaction.
//!
//! Batches for one entity run one at a time; different entities never wait
//! on each other.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
  Error, Result,
  allocator::SequenceAllocator,
  batch::{self, BatchReport, RecordError, RejectedRow},
  clock::{Clock, SystemClock},
  config::EngineConfig,
  detect::{self, ChangeKind, Classification, KeyAction, Plan},
  entity::{Dimension, EntityMeta},
  key::BusinessKey,
  store::{ChangeSet, Closure, CommitAck, DimensionStore, Refresh},
  value::{Record, Value},
  version::VersionRow,
};

// ─── Outcome ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
  pub total_rows:     usize,
  pub new_rows:       usize,
  pub changed_rows:   usize,
  pub unchanged_rows: usize,
}

impl BatchStats {
  fn from_classifications(classifications: &[Classification]) -> Self {
    let count = |kind: ChangeKind| classifications.iter().filter(|c| c.kind == kind).count();
    Self {
      total_rows:     classifications.len(),
      new_rows:       count(ChangeKind::New),
      changed_rows:   count(ChangeKind::Changed),
      unchanged_rows: count(ChangeKind::Unchanged),
    }
  }
}

/// The result of one applied batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
  pub batch_id:        Uuid,
  pub entity:          String,
  pub as_of:           DateTime<Utc>,
  pub classifications: Vec<Classification>,
  /// Current rows closed by this batch.
  pub closed:          usize,
  /// Version rows inserted, including ones superseded within the batch.
  pub inserted:        usize,
  /// Current rows whose untracked columns were rewritten.
  pub refreshed:       usize,
  pub stats:           BatchStats,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Per-entity writer state, guarded by the entity lock.
#[derive(Debug, Default)]
struct EntitySlot {
  /// Seeded from the store on first use and after a failed commit.
  allocator: Option<SequenceAllocator>,
}

pub struct VersioningEngine<S> {
  store:    Arc<S>,
  clock:    Arc<dyn Clock>,
  config:   EngineConfig,
  entities: Mutex<HashMap<String, Arc<AsyncMutex<EntitySlot>>>>,
}

impl<S: DimensionStore> VersioningEngine<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      config: EngineConfig::default(),
      entities: Mutex::new(HashMap::new()),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }

  // ── Metadata ──────────────────────────────────────────────────────────

  /// Validate and persist an entity definition. Returns `false` when the same
  /// definition was already registered.
  #[tracing::instrument(skip_all, fields(entity = %meta.name))]
  pub async fn register_entity(&self, meta: EntityMeta) -> Result<bool> {
    meta.validate()?;
    let created = self.store.register_entity(meta).await.map_err(Into::into)?;
    if created {
      tracing::info!("registered entity");
    }
    Ok(created)
  }

  pub async fn entity(&self, name: &str) -> Result<EntityMeta> {
    self
      .store
      .entity(name)
      .await
      .map_err(Into::into)?
      .ok_or_else(|| Error::UnknownEntity(name.to_owned()))
  }

  pub async fn list_entities(&self) -> Result<Vec<EntityMeta>> {
    self.store.list_entities().await.map_err(Into::into)
  }

  /// The versioned view of `name`. Fails unless it is a registered
  /// `type2_dimension`.
  pub async fn dimension(&self, name: &str) -> Result<Dimension> {
    Dimension::try_from(&self.entity(name).await?)
  }

  // ── Apply ─────────────────────────────────────────────────────────────

  /// Apply `batch` with the clock's current time as `as_of`.
  pub async fn apply(&self, entity: &str, batch: Vec<Record>) -> Result<ApplyOutcome> {
    let as_of = self.clock.now();
    self.apply_as_of(entity, batch, as_of).await
  }

  /// Apply `batch` as the state of `entity` at `as_of`.
  ///
  /// Either every closure and insert is committed or, on any error, nothing
  /// is. A validation failure is returned as [`Error::BatchRejected`].
  #[tracing::instrument(skip(self, batch), fields(rows = batch.len()))]
  pub async fn apply_as_of(
    &self,
    entity: &str,
    batch: Vec<Record>,
    as_of: DateTime<Utc>,
  ) -> Result<ApplyOutcome> {
    let dimension = self.dimension(entity).await?;
    let prepared = batch::prepare(&dimension, &batch).map_err(reject)?;

    let mut slot = self.lock_entity(entity).await?;

    let keys = distinct_keys(prepared.iter().map(|row| &row.key));
    let current: HashMap<BusinessKey, VersionRow> = self
      .store
      .read_current_rows(&dimension, &keys)
      .await
      .map_err(Into::into)?
      .into_iter()
      .map(|row| (row.business_key.clone(), row))
      .collect();

    let plan = detect::plan(&dimension, prepared, &current, self.config.untracked_policy);
    check_order(&dimension, &plan, as_of, batch.len()).map_err(reject)?;

    let allocator = match slot.allocator.take() {
      Some(allocator) => allocator,
      None => {
        let last = self.store.last_surrogate_key(&dimension).await.map_err(Into::into)?;
        SequenceAllocator::new(entity, last, self.config.max_surrogate_key)
      }
    };

    let load_date = self.clock.now();
    let Plan { classifications, keys: key_plans } = plan;
    let mut changes = ChangeSet::new(entity);
    for key_plan in key_plans {
      match key_plan.action {
        KeyAction::Unchanged => {}
        KeyAction::Refresh { current, attributes } => {
          tracing::debug!(key = %key_plan.key, "refreshing untracked columns");
          changes.refreshes.push(Refresh {
            surrogate_key: current.surrogate_key,
            business_key: key_plan.key,
            attributes,
          });
        }
        KeyAction::Version { supersedes, versions } => {
          if let Some(current) = supersedes {
            tracing::debug!(key = %key_plan.key, closed = %current.surrogate_key, "closing current row");
            changes.closures.push(Closure {
              surrogate_key: current.surrogate_key,
              business_key:  key_plan.key.clone(),
              valid_to:      as_of,
            });
          }
          let last = versions.len().saturating_sub(1);
          for (i, version) in versions.into_iter().enumerate() {
            let is_current = i == last;
            changes.inserts.push(VersionRow {
              surrogate_key: allocator.allocate()?,
              business_key: version.key,
              attributes: version.attributes,
              valid_from: as_of,
              valid_to: (!is_current).then_some(as_of),
              is_current,
              row_hash: version.row_hash,
              load_date,
            });
          }
        }
      }
    }
    changes.last_surrogate_key = allocator.last_issued();

    let ack = if changes.is_empty() {
      CommitAck::default()
    } else {
      self.store.commit(&dimension, changes).await.map_err(|e| {
        let e: Error = e.into();
        tracing::warn!(error = %e, "commit failed");
        e
      })?
    };
    // Only a committed allocator is kept; after any failure it is reseeded
    // from the store.
    slot.allocator = Some(allocator);
    drop(slot);

    let outcome = ApplyOutcome {
      batch_id: Uuid::new_v4(),
      entity: entity.to_owned(),
      as_of,
      stats: BatchStats::from_classifications(&classifications),
      classifications,
      closed: ack.closed,
      inserted: ack.inserted,
      refreshed: ack.refreshed,
    };
    tracing::info!(
      batch_id = %outcome.batch_id,
      new = outcome.stats.new_rows,
      changed = outcome.stats.changed_rows,
      unchanged = outcome.stats.unchanged_rows,
      closed = outcome.closed,
      inserted = outcome.inserted,
      refreshed = outcome.refreshed,
      "batch applied"
    );
    Ok(outcome)
  }

  async fn lock_entity(&self, entity: &str) -> Result<OwnedMutexGuard<EntitySlot>> {
    let slot = {
      let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
      Arc::clone(entities.entry(entity.to_owned()).or_default())
    };
    match self.config.lock_timeout() {
      None => Ok(slot.lock_owned().await),
      Some(timeout) => tokio::time::timeout(timeout, slot.lock_owned()).await.map_err(|_| {
        tracing::warn!(?timeout, "timed out waiting for entity lock");
        Error::ConcurrencyConflict(entity.to_owned())
      }),
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Every version of the member identified by `key`, oldest first. `key`
  /// holds one value per business key column, in declaration order; values
  /// are coerced to the declared column types.
  pub async fn history(&self, entity: &str, key: Vec<Value>) -> Result<Vec<VersionRow>> {
    let dimension = self.dimension(entity).await?;
    let columns = dimension.key_columns();
    if key.len() != columns.len() {
      return Err(Error::InvalidRecord(RecordError::InvalidKey {
        column: None,
        reason: format!("expected {} key values, got {}", columns.len(), key.len()),
      }));
    }
    let record: Record = columns.iter().map(|c| c.name.clone()).zip(key).collect();
    let key = crate::key::resolve(&record, columns)?;
    self.store.history(&dimension, &key).await.map_err(Into::into)
  }

  pub async fn current_rows(&self, entity: &str) -> Result<Vec<VersionRow>> {
    let dimension = self.dimension(entity).await?;
    self.store.current_rows(&dimension).await.map_err(Into::into)
  }

  /// The dimension as it stood at `at`.
  pub async fn as_of(&self, entity: &str, at: DateTime<Utc>) -> Result<Vec<VersionRow>> {
    let dimension = self.dimension(entity).await?;
    self.store.as_of(&dimension, at).await.map_err(Into::into)
  }
}

fn reject(report: BatchReport) -> Error {
  tracing::warn!(
    entity = %report.entity,
    rejected = report.rejected.len(),
    total = report.total_rows,
    "batch rejected"
  );
  Error::BatchRejected(report)
}

fn distinct_keys<'a>(keys: impl Iterator<Item = &'a BusinessKey>) -> Vec<BusinessKey> {
  let mut seen = HashSet::new();
  keys.filter(|k| seen.insert(*k)).cloned().collect()
}

/// A batch may not close a current row before that row's own start.
fn check_order(
  dimension: &Dimension,
  plan: &Plan,
  as_of: DateTime<Utc>,
  total_rows: usize,
) -> Result<(), BatchReport> {
  let mut rejected: Vec<RejectedRow> = plan
    .keys
    .iter()
    .filter_map(|key_plan| match &key_plan.action {
      KeyAction::Version { supersedes: Some(current), versions } if as_of < current.valid_from => {
        let index = versions.first().map_or(0, |v| v.index);
        Some(RejectedRow {
          index,
          errors: vec![RecordError::OutOfOrder { as_of, valid_from: current.valid_from }],
        })
      }
      _ => None,
    })
    .collect();

  if rejected.is_empty() {
    Ok(())
  } else {
    rejected.sort_by_key(|r| r.index);
    Err(BatchReport { entity: dimension.name().to_owned(), total_rows, rejected })
  }
}
