//! Batch validation.
//!
//! Every row of an incoming batch is validated before anything is read from or
//! written to the store. Failures are collected per row into a
//! [`BatchReport`]; a single failure rejects the whole batch.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
  entity::{ColumnMeta, Dimension},
  hash::{RowHash, row_hash},
  key::{self, BusinessKey},
  value::{ColumnType, Record, Value},
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Why a single row was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordError {
  #[error("invalid business key{}: {reason}", key_column_label(.column))]
  InvalidKey {
    column: Option<String>,
    reason: String,
  },

  #[error("column {column:?} is missing from the record")]
  SchemaMismatch { column: String },

  #[error("column {column:?}: {value} is not a valid {expected}")]
  TypeMismatch {
    column:   String,
    expected: ColumnType,
    value:    String,
  },

  #[error("column {column:?} may not be null")]
  NullNotAllowed { column: String },

  /// The batch timestamp precedes the start of the current version it would
  /// close.
  #[error("as_of {as_of} precedes valid_from {valid_from} of the current row")]
  OutOfOrder {
    as_of:      DateTime<Utc>,
    valid_from: DateTime<Utc>,
  },
}

fn key_column_label(column: &Option<String>) -> String {
  column.as_deref().map(|c| format!(" column {c:?}")).unwrap_or_default()
}

/// A rejected row and everything wrong with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
  /// Zero-based position in the submitted batch.
  pub index:  usize,
  pub errors: Vec<RecordError>,
}

/// The structured result of a rejected batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
  pub entity:     String,
  pub total_rows: usize,
  pub rejected:   Vec<RejectedRow>,
}

impl fmt::Display for BatchReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "batch for {} rejected: {} of {} rows failed validation",
      self.entity,
      self.rejected.len(),
      self.total_rows
    )?;
    if let Some(first) = self.rejected.first()
      && let Some(err) = first.errors.first()
    {
      write!(f, " (row {}: {err})", first.index)?;
    }
    Ok(())
  }
}

// ─── Prepared rows ───────────────────────────────────────────────────────────

/// A validated incoming row: key resolved, attributes coerced, tracked
/// columns fingerprinted.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
  pub index:      usize,
  pub key:        BusinessKey,
  /// Tracked and untracked attribute values, excluding key columns.
  pub attributes: Record,
  pub row_hash:   RowHash,
}

/// Validate every row of `rows` against `dimension`.
///
/// Columns not declared on the dimension are dropped. Declared untracked
/// columns that are absent read as null; absent key or tracked columns are a
/// [`RecordError::SchemaMismatch`].
pub fn prepare(dimension: &Dimension, rows: &[Record]) -> Result<Vec<PreparedRow>, BatchReport> {
  let mut prepared = Vec::with_capacity(rows.len());
  let mut rejected = Vec::new();

  for (index, record) in rows.iter().enumerate() {
    match prepare_row(dimension, index, record) {
      Ok(row) => prepared.push(row),
      Err(errors) => rejected.push(RejectedRow { index, errors }),
    }
  }

  if rejected.is_empty() {
    Ok(prepared)
  } else {
    Err(BatchReport {
      entity: dimension.name().to_owned(),
      total_rows: rows.len(),
      rejected,
    })
  }
}

fn prepare_row(
  dimension: &Dimension,
  index: usize,
  record: &Record,
) -> Result<PreparedRow, Vec<RecordError>> {
  let mut errors = Vec::new();

  let key = key::resolve(record, dimension.key_columns())
    .map_err(|e| errors.push(e))
    .ok();

  let mut attributes = Record::new();
  for column in dimension.tracked_columns() {
    match record.get(&column.name) {
      Some(raw) => coerce_attribute(column, raw, &mut attributes, &mut errors),
      None => errors.push(RecordError::SchemaMismatch { column: column.name.clone() }),
    }
  }
  for column in dimension.untracked_columns() {
    let raw = record.get(&column.name).unwrap_or(&Value::Null);
    coerce_attribute(column, raw, &mut attributes, &mut errors);
  }

  match key {
    Some(key) if errors.is_empty() => {
      let row_hash = row_hash(
        &attributes,
        dimension.tracked_columns().iter().map(|c| c.name.as_str()),
      );
      Ok(PreparedRow { index, key, attributes, row_hash })
    }
    _ => Err(errors),
  }
}

fn coerce_attribute(
  column: &ColumnMeta,
  raw: &Value,
  attributes: &mut Record,
  errors: &mut Vec<RecordError>,
) {
  if raw.is_null() && !column.nullable {
    errors.push(RecordError::NullNotAllowed { column: column.name.clone() });
    return;
  }
  match column.data_type.coerce(raw) {
    Some(value) => {
      attributes.insert(column.name.clone(), value);
    }
    None => errors.push(RecordError::TypeMismatch {
      column:   column.name.clone(),
      expected: column.data_type,
      value:    raw.to_string(),
    }),
  }
}
