//! Business keys: the natural identifier of a dimension member.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
  batch::RecordError,
  entity::ColumnMeta,
  value::{Record, Value},
};

/// The ordered tuple of key column values identifying a member across all of
/// its versions. Values are already coerced to the declared column types, so
/// equality is exact-match on every component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessKey(Vec<Value>);

impl BusinessKey {
  pub fn new(values: Vec<Value>) -> Self { Self(values) }

  pub fn values(&self) -> &[Value] { &self.0 }

  pub fn into_values(self) -> Vec<Value> { self.0 }
}

impl fmt::Display for BusinessKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0.as_slice() {
      [single] => write!(f, "{single}"),
      values => {
        f.write_str("(")?;
        for (i, v) in values.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{v}")?;
        }
        f.write_str(")")
      }
    }
  }
}

/// Extract the business key of `record`.
///
/// Each key value is coerced to its column's declared type. Fails with
/// [`RecordError::SchemaMismatch`] if a key column is absent, and with
/// [`RecordError::InvalidKey`] if no key columns are declared or a key value
/// is null or cannot be coerced.
pub fn resolve(record: &Record, key_columns: &[ColumnMeta]) -> Result<BusinessKey, RecordError> {
  if key_columns.is_empty() {
    return Err(RecordError::InvalidKey {
      column: None,
      reason: "no business key columns are declared".to_owned(),
    });
  }

  key_columns
    .iter()
    .map(|column| {
      let raw = record
        .get(&column.name)
        .ok_or_else(|| RecordError::SchemaMismatch { column: column.name.clone() })?;
      if raw.is_null() {
        return Err(RecordError::InvalidKey {
          column: Some(column.name.clone()),
          reason: "value is null".to_owned(),
        });
      }
      column.data_type.coerce(raw).ok_or_else(|| RecordError::InvalidKey {
        column: Some(column.name.clone()),
        reason: format!("{raw} is not a valid {}", column.data_type),
      })
    })
    .collect::<Result<Vec<_>, _>>()
    .map(BusinessKey)
}
