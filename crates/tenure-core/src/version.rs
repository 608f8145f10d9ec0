//! Version rows. Each is one historical version of a dimension member.
//!
//! A version row is written once. The only later mutation is closing it
//! (`valid_to`, `is_current`), plus the in-place refresh of untracked columns
//! on the current row when [`UntrackedPolicy::UpdateInPlace`] is configured.
//!
//! [`UntrackedPolicy::UpdateInPlace`]: crate::config::UntrackedPolicy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  allocator::SurrogateKey,
  entity::Dimension,
  hash::RowHash,
  key::BusinessKey,
  value::Record,
};

// ─── Downstream column contract ──────────────────────────────────────────────

pub const VALID_FROM: &str = "_valid_from";
pub const VALID_TO: &str = "_valid_to";
pub const IS_CURRENT: &str = "_is_current";
pub const ROW_HASH: &str = "_row_hash";
pub const LOAD_DATE: &str = "_load_date";

/// Name of the surrogate key column for `entity`, e.g. `customer_key`.
pub fn surrogate_key_column(entity: &str) -> String { format!("{entity}_key") }

// ─── VersionRow ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRow {
  pub surrogate_key: SurrogateKey,
  pub business_key:  BusinessKey,
  /// Tracked and untracked attribute values.
  pub attributes:    Record,
  /// Inclusive start of validity.
  pub valid_from:    DateTime<Utc>,
  /// Exclusive end of validity; `None` while current.
  pub valid_to:      Option<DateTime<Utc>>,
  pub is_current:    bool,
  pub row_hash:      RowHash,
  pub load_date:     DateTime<Utc>,
}

impl VersionRow {
  /// End this version's validity at `at`.
  pub fn close(&mut self, at: DateTime<Utc>) {
    self.valid_to = Some(at);
    self.is_current = false;
  }

  /// Whether this version was the truth at `at`.
  pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
    self.valid_from <= at && self.valid_to.is_none_or(|to| at < to)
  }

  /// Render the row with the downstream column names: `{entity}_key`, the
  /// business key and attribute columns, then `_valid_from`, `_valid_to`,
  /// `_is_current`, `_row_hash`, `_load_date`.
  pub fn to_columns(&self, dimension: &Dimension) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    out.insert(dimension.surrogate_key_column(), self.surrogate_key.0.into());
    for (column, value) in dimension.key_columns().iter().zip(self.business_key.values()) {
      out.insert(column.name.clone(), value.to_json());
    }
    for (name, value) in &self.attributes {
      out.insert(name.clone(), value.to_json());
    }
    out.insert(VALID_FROM.to_owned(), self.valid_from.to_rfc3339().into());
    out.insert(
      VALID_TO.to_owned(),
      self.valid_to.map(|t| t.to_rfc3339()).map_or(serde_json::Value::Null, Into::into),
    );
    out.insert(IS_CURRENT.to_owned(), self.is_current.into());
    out.insert(ROW_HASH.to_owned(), self.row_hash.to_hex().into());
    out.insert(LOAD_DATE.to_owned(), self.load_date.to_rfc3339().into());
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    entity::{ColumnMeta, EntityMeta},
    hash::row_hash,
    value::{ColumnType, Value},
  };

  fn row() -> VersionRow {
    let attributes: Record = [("name".to_owned(), Value::from("Alice"))].into();
    VersionRow {
      surrogate_key: SurrogateKey(100),
      business_key:  BusinessKey::new(vec![Value::Int(1)]),
      row_hash:      row_hash(&attributes, ["name"]),
      attributes,
      valid_from:    "2024-01-01T00:00:00Z".parse().unwrap(),
      valid_to:      None,
      is_current:    true,
      load_date:     "2024-01-01T00:00:05Z".parse().unwrap(),
    }
  }

  #[test]
  fn validity_is_half_open() {
    let mut r = row();
    let from = r.valid_from;
    let to: DateTime<Utc> = "2024-02-01T00:00:00Z".parse().unwrap();
    assert!(r.is_valid_at(to));
    r.close(to);
    assert!(!r.is_current);
    assert!(r.is_valid_at(from));
    assert!(!r.is_valid_at(to));
    assert!(!r.is_valid_at(from - chrono::TimeDelta::seconds(1)));
  }

  #[test]
  fn renders_downstream_column_names() {
    let dim = Dimension::try_from(
      &EntityMeta::type2("customer")
        .column(ColumnMeta::new("id", ColumnType::Integer).business_key())
        .column(ColumnMeta::new("name", ColumnType::Varchar)),
    )
    .unwrap();
    let cols = row().to_columns(&dim);
    for name in ["customer_key", "id", "name", VALID_FROM, VALID_TO, IS_CURRENT, ROW_HASH, LOAD_DATE] {
      assert!(cols.contains_key(name), "missing column {name}");
    }
    assert_eq!(cols["customer_key"], 100);
    assert_eq!(cols["id"], 1);
    assert_eq!(cols[VALID_TO], serde_json::Value::Null);
    assert_eq!(cols[IS_CURRENT], true);
  }
}
