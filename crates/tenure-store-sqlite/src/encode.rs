//! Encoding and decoding helpers between Tenure domain types and SQLite
//! column values.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (nanosecond
//! precision, `Z` suffix) so that text comparison in SQL orders them
//! chronologically. Dates are stored as `YYYY-MM-DD`, booleans as 0/1.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use tenure_core::{
  allocator::SurrogateKey,
  entity::{ColumnMeta, Dimension, EntityMeta},
  hash::RowHash,
  key::BusinessKey,
  value::{ColumnType, Record, Value},
  version::VersionRow,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Nanos, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn encode_value(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Int(i) => SqlValue::Integer(*i),
    Value::Float(f) => SqlValue::Real(*f),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
    Value::Timestamp(t) => SqlValue::Text(encode_dt(*t)),
  }
}

/// Decode a stored value according to its declared column type.
pub fn decode_value(column: &ColumnMeta, raw: SqlValue) -> Result<Value> {
  let mismatch = |raw: &SqlValue| Error::Decode {
    column: column.name.clone(),
    reason: format!("{raw:?} is not a stored {}", column.data_type),
  };

  let value = match (column.data_type, raw) {
    (_, SqlValue::Null) => Value::Null,
    (ColumnType::Integer, SqlValue::Integer(i)) => Value::Int(i),
    (ColumnType::Double, SqlValue::Real(f)) => Value::Float(f),
    (ColumnType::Double, SqlValue::Integer(i)) => Value::Float(i as f64),
    (ColumnType::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
    (ColumnType::Varchar, SqlValue::Text(s)) => Value::Text(s),
    (ColumnType::Date, SqlValue::Text(s)) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
      .map(Value::Date)
      .map_err(|_| mismatch(&SqlValue::Text(s)))?,
    (ColumnType::Timestamp, SqlValue::Text(s)) => Value::Timestamp(decode_dt(&s)?),
    (_, other) => return Err(mismatch(&other)),
  };
  Ok(value)
}

/// The canonical text form of a business key. Key values are already coerced
/// to their declared types, so equal keys always encode identically.
pub fn encode_business_key(key: &BusinessKey) -> Result<String> {
  Ok(serde_json::to_string(key)?)
}

// ─── Version rows ────────────────────────────────────────────────────────────

/// Insert parameters for `row`, matching [`crate::schema::insert_sql`].
pub fn encode_version(dimension: &Dimension, row: &VersionRow) -> Result<Vec<SqlValue>> {
  let mut params = vec![SqlValue::Integer(row.surrogate_key.0)];
  params.extend(row.business_key.values().iter().map(encode_value));
  params.extend(
    dimension
      .attribute_columns()
      .map(|c| row.attributes.get(&c.name).map_or(SqlValue::Null, encode_value)),
  );
  params.extend([
    SqlValue::Text(encode_business_key(&row.business_key)?),
    SqlValue::Text(encode_dt(row.valid_from)),
    row.valid_to.map_or(SqlValue::Null, |t| SqlValue::Text(encode_dt(t))),
    SqlValue::Integer(i64::from(row.is_current)),
    SqlValue::Text(row.row_hash.to_hex()),
    SqlValue::Text(encode_dt(row.load_date)),
  ]);
  Ok(params)
}

/// Raw values read directly from a dimension table row, in
/// [`crate::schema::select_list`] order.
pub struct RawVersion {
  pub surrogate_key: i64,
  /// Key columns, then attribute columns.
  pub values:        Vec<SqlValue>,
  pub valid_from:    String,
  pub valid_to:      Option<String>,
  pub is_current:    bool,
  pub row_hash:      String,
  pub load_date:     String,
}

impl RawVersion {
  /// Read a row selected with `select_list` for a dimension with
  /// `user_columns` key and attribute columns.
  pub fn from_row(row: &rusqlite::Row<'_>, user_columns: usize) -> rusqlite::Result<Self> {
    let values = (1..=user_columns)
      .map(|i| row.get::<_, SqlValue>(i))
      .collect::<rusqlite::Result<Vec<_>>>()?;
    let base = user_columns + 1;
    Ok(Self {
      surrogate_key: row.get(0)?,
      values,
      valid_from:    row.get(base)?,
      valid_to:      row.get(base + 1)?,
      is_current:    row.get(base + 2)?,
      row_hash:      row.get(base + 3)?,
      load_date:     row.get(base + 4)?,
    })
  }

  pub fn into_version(self, dimension: &Dimension) -> Result<VersionRow> {
    let key_len = dimension.key_columns().len();
    let mut key = Vec::with_capacity(key_len);
    let mut attributes = Record::new();
    for (i, (column, raw)) in dimension.columns().zip(self.values).enumerate() {
      let value = decode_value(column, raw)?;
      if i < key_len {
        key.push(value);
      } else {
        attributes.insert(column.name.clone(), value);
      }
    }

    Ok(VersionRow {
      surrogate_key: SurrogateKey(self.surrogate_key),
      business_key:  BusinessKey::new(key),
      attributes,
      valid_from:    decode_dt(&self.valid_from)?,
      valid_to:      self.valid_to.as_deref().map(decode_dt).transpose()?,
      is_current:    self.is_current,
      row_hash:      RowHash::from_hex(&self.row_hash).map_err(|e| Error::Decode {
        column: tenure_core::version::ROW_HASH.to_owned(),
        reason: e.to_string(),
      })?,
      load_date:     decode_dt(&self.load_date)?,
    })
  }
}

// ─── Entity metadata ─────────────────────────────────────────────────────────

/// Raw strings read directly from an `entity_column_metadata` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
  pub name:          String,
  pub data_type:     String,
  pub nullable:      bool,
  pub business_key:  bool,
  pub track_history: bool,
  pub description:   Option<String>,
}

/// Raw strings read from `entity_metadata` plus its columns in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntity {
  pub name:        String,
  pub entity_type: String,
  pub description: Option<String>,
  pub columns:     Vec<RawColumn>,
}

impl RawEntity {
  pub fn from_meta(meta: &EntityMeta) -> Self {
    Self {
      name:        meta.name.clone(),
      entity_type: meta.entity_type.as_ref().to_owned(),
      description: meta.description.clone(),
      columns:     meta
        .columns
        .iter()
        .map(|c| RawColumn {
          name:          c.name.clone(),
          data_type:     c.data_type.as_str().to_owned(),
          nullable:      c.nullable,
          business_key:  c.business_key,
          track_history: c.track_history,
          description:   c.description.clone(),
        })
        .collect(),
    }
  }

  pub fn into_meta(self) -> Result<EntityMeta> {
    let entity_type = self.entity_type.parse().map_err(|_| Error::Decode {
      column: "entity_type".to_owned(),
      reason: format!("unknown entity type {:?}", self.entity_type),
    })?;
    let columns = self
      .columns
      .into_iter()
      .map(|c| {
        Ok(ColumnMeta {
          data_type:     c.data_type.parse::<ColumnType>()?,
          name:          c.name,
          nullable:      c.nullable,
          business_key:  c.business_key,
          track_history: c.track_history,
          description:   c.description,
        })
      })
      .collect::<Result<Vec<_>>>()?;
    Ok(EntityMeta {
      name: self.name,
      entity_type,
      description: self.description,
      columns,
    })
  }
}
