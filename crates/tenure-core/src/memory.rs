//! [`MemoryStore`]: an in-process [`DimensionStore`].
//!
//! Useful for tests and for embedding the engine without persistence. A
//! commit is validated against a copy of the table and swapped in only when
//! every operation applies, so a failed commit leaves no trace.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  allocator::SurrogateKey,
  entity::{Dimension, EntityMeta},
  key::BusinessKey,
  store::{ChangeSet, CommitAck, DimensionStore},
  version::VersionRow,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  entities: BTreeMap<String, EntityMeta>,
  tables:   HashMap<String, Table>,
}

#[derive(Debug, Clone, Default)]
struct Table {
  rows:       Vec<VersionRow>,
  high_water: Option<SurrogateKey>,
}

impl Table {
  fn current_mut(&mut self, surrogate_key: SurrogateKey, key: &BusinessKey) -> Option<&mut VersionRow> {
    self
      .rows
      .iter_mut()
      .find(|r| r.surrogate_key == surrogate_key && r.is_current && &r.business_key == key)
  }

  fn apply(&mut self, changes: ChangeSet) -> Result<CommitAck> {
    let conflict = || Error::ConcurrencyConflict(changes.entity.clone());
    let mut ack = CommitAck::default();

    for closure in &changes.closures {
      let row = self
        .current_mut(closure.surrogate_key, &closure.business_key)
        .ok_or_else(conflict)?;
      row.close(closure.valid_to);
      ack.closed += 1;
    }

    for refresh in &changes.refreshes {
      let row = self
        .current_mut(refresh.surrogate_key, &refresh.business_key)
        .ok_or_else(conflict)?;
      row.attributes.extend(refresh.attributes.clone());
      ack.refreshed += 1;
    }

    for insert in &changes.inserts {
      let duplicate_key = self.rows.iter().any(|r| r.surrogate_key == insert.surrogate_key);
      let second_current = insert.is_current
        && self.rows.iter().any(|r| r.is_current && r.business_key == insert.business_key);
      if duplicate_key || second_current {
        return Err(conflict());
      }
      self.high_water = self.high_water.max(Some(insert.surrogate_key));
      self.rows.push(insert.clone());
      ack.inserted += 1;
    }

    self.high_water = self.high_water.max(changes.last_surrogate_key);
    Ok(ack)
  }
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn select(
    &self,
    dimension: &Dimension,
    mut filter: impl FnMut(&VersionRow) -> bool,
  ) -> Vec<VersionRow> {
    let inner = self.lock();
    let mut rows: Vec<VersionRow> = inner
      .tables
      .get(dimension.name())
      .map(|t| t.rows.iter().filter(|r| filter(r)).cloned().collect())
      .unwrap_or_default();
    rows.sort_by_key(|r| r.surrogate_key);
    rows
  }
}

impl DimensionStore for MemoryStore {
  type Error = Error;

  async fn register_entity(&self, meta: EntityMeta) -> Result<bool> {
    meta.validate()?;
    let mut inner = self.lock();
    match inner.entities.get(&meta.name) {
      Some(existing) if *existing == meta => Ok(false),
      Some(_) => Err(Error::EntityConflict(meta.name)),
      None => {
        inner.entities.insert(meta.name.clone(), meta);
        Ok(true)
      }
    }
  }

  async fn entity(&self, name: &str) -> Result<Option<EntityMeta>> {
    Ok(self.lock().entities.get(name).cloned())
  }

  async fn list_entities(&self) -> Result<Vec<EntityMeta>> {
    Ok(self.lock().entities.values().cloned().collect())
  }

  async fn read_current_rows(
    &self,
    dimension: &Dimension,
    keys: &[BusinessKey],
  ) -> Result<Vec<VersionRow>> {
    Ok(self.select(dimension, |r| r.is_current && keys.contains(&r.business_key)))
  }

  async fn last_surrogate_key(&self, dimension: &Dimension) -> Result<Option<SurrogateKey>> {
    Ok(self.lock().tables.get(dimension.name()).and_then(|t| t.high_water))
  }

  async fn commit(&self, dimension: &Dimension, changes: ChangeSet) -> Result<CommitAck> {
    let mut inner = self.lock();
    let mut table = inner.tables.get(dimension.name()).cloned().unwrap_or_default();
    let ack = table.apply(changes)?;
    inner.tables.insert(dimension.name().to_owned(), table);
    Ok(ack)
  }

  async fn history(&self, dimension: &Dimension, key: &BusinessKey) -> Result<Vec<VersionRow>> {
    let mut rows = self.select(dimension, |r| &r.business_key == key);
    rows.sort_by_key(|r| (r.valid_from, r.surrogate_key));
    Ok(rows)
  }

  async fn current_rows(&self, dimension: &Dimension) -> Result<Vec<VersionRow>> {
    Ok(self.select(dimension, |r| r.is_current))
  }

  async fn as_of(&self, dimension: &Dimension, at: DateTime<Utc>) -> Result<Vec<VersionRow>> {
    Ok(self.select(dimension, |r| r.is_valid_at(at)))
  }
}
