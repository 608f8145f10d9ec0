//! Column values, records, and declared column types.
//!
//! Incoming rows are loosely typed (JSON scalars). Before a value takes part in
//! key lookup or hashing it is coerced to the column's declared [`ColumnType`],
//! so that `1`, `1.0` and `"1"` in an `INTEGER` column are the same value.

use std::{
  cmp::Ordering,
  collections::BTreeMap,
  fmt,
  hash::{Hash, Hasher},
  str::FromStr,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::Error;

/// A single incoming or stored row, keyed by column name.
pub type Record = BTreeMap<String, Value>;

const DATE_FORMAT: &str = "%Y-%m-%d";

// ─── Value ───────────────────────────────────────────────────────────────────

/// A scalar column value.
#[derive(Debug, Clone)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
  Date(NaiveDate),
  Timestamp(DateTime<Utc>),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  fn rank(&self) -> u8 {
    match self {
      Self::Null => 0,
      Self::Bool(_) => 1,
      Self::Int(_) => 2,
      Self::Float(_) => 3,
      Self::Text(_) => 4,
      Self::Date(_) => 5,
      Self::Timestamp(_) => 6,
    }
  }

  /// Append an unambiguous, type-tagged byte encoding of this value.
  ///
  /// Text is length-prefixed, so no two distinct sequences of values share an
  /// encoding, and `Null` never encodes like an empty string.
  pub fn write_canonical(&self, out: &mut Vec<u8>) {
    match self {
      Self::Null => out.push(b'N'),
      Self::Bool(b) => {
        out.push(b'B');
        out.push(u8::from(*b));
      }
      Self::Int(i) => {
        out.push(b'I');
        out.extend_from_slice(&i.to_be_bytes());
      }
      Self::Float(f) => {
        out.push(b'F');
        out.extend_from_slice(&f.to_bits().to_be_bytes());
      }
      Self::Text(s) => {
        out.push(b'S');
        out.extend_from_slice(&(s.len() as u64).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
      }
      Self::Date(d) => {
        out.push(b'D');
        out.extend_from_slice(d.format(DATE_FORMAT).to_string().as_bytes());
      }
      Self::Timestamp(t) => {
        out.push(b'T');
        out.extend_from_slice(&t.timestamp().to_be_bytes());
        out.extend_from_slice(&t.timestamp_subsec_nanos().to_be_bytes());
      }
    }
  }

  /// The JSON form used in API responses and column renderings.
  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Self::Null => serde_json::Value::Null,
      Self::Bool(b) => serde_json::Value::Bool(*b),
      Self::Int(i) => serde_json::Value::from(*i),
      Self::Float(f) => serde_json::Value::from(*f),
      Self::Text(s) => serde_json::Value::String(s.clone()),
      Self::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
      Self::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Null => f.write_str("null"),
      Self::Bool(b) => write!(f, "{b}"),
      Self::Int(i) => write!(f, "{i}"),
      Self::Float(x) => write!(f, "{x}"),
      Self::Text(s) => write!(f, "{s:?}"),
      Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
      Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
    }
  }
}

// Floats compare by total order so that values can key hash maps.
impl Ord for Value {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (Self::Null, Self::Null) => Ordering::Equal,
      (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
      (Self::Int(a), Self::Int(b)) => a.cmp(b),
      (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
      (Self::Text(a), Self::Text(b)) => a.cmp(b),
      (Self::Date(a), Self::Date(b)) => a.cmp(b),
      (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
      _ => self.rank().cmp(&other.rank()),
    }
  }
}

impl PartialOrd for Value {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for Value {}

impl Hash for Value {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.rank().hash(state);
    match self {
      Self::Null => {}
      Self::Bool(b) => b.hash(state),
      Self::Int(i) => i.hash(state),
      Self::Float(f) => f.to_bits().hash(state),
      Self::Text(s) => s.hash(state),
      Self::Date(d) => d.hash(state),
      Self::Timestamp(t) => t.hash(state),
    }
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Self::Null => serializer.serialize_unit(),
      Self::Bool(b) => serializer.serialize_bool(*b),
      Self::Int(i) => serializer.serialize_i64(*i),
      Self::Float(f) => serializer.serialize_f64(*f),
      Self::Text(s) => serializer.serialize_str(s),
      Self::Date(d) => serializer.collect_str(&d.format(DATE_FORMAT)),
      Self::Timestamp(t) => serializer.serialize_str(&t.to_rfc3339()),
    }
  }
}

/// Accepts any JSON scalar. Dates and timestamps arrive as text and are
/// recovered by coercion against the declared column type.
impl<'de> Deserialize<'de> for Value {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct ValueVisitor;

    impl<'de> de::Visitor<'de> for ValueVisitor {
      type Value = Value;

      fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar column value")
      }

      fn visit_unit<E: de::Error>(self) -> Result<Value, E> { Ok(Value::Null) }

      fn visit_none<E: de::Error>(self) -> Result<Value, E> { Ok(Value::Null) }

      fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Value, D2::Error> {
        Value::deserialize(d)
      }

      fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> { Ok(Value::Bool(v)) }

      fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> { Ok(Value::Int(v)) }

      fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
          .map(Value::Int)
          .map_err(|_| E::custom(format!("integer {v} does not fit in 64 bits")))
      }

      fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> { Ok(Value::Float(v)) }

      fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_owned()))
      }

      fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
      }
    }

    deserializer.deserialize_any(ValueVisitor)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self { Self::Int(i) }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self { Self::Float(f) }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<NaiveDate> for Value {
  fn from(d: NaiveDate) -> Self { Self::Date(d) }
}

impl From<DateTime<Utc>> for Value {
  fn from(t: DateTime<Utc>) -> Self { Self::Timestamp(t) }
}

// ─── ColumnType ──────────────────────────────────────────────────────────────

/// The declared type of a dimension column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
  Integer,
  Double,
  Varchar,
  Boolean,
  Date,
  Timestamp,
}

impl ColumnType {
  /// Canonical SQL name, also used as the serialised form.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Integer => "INTEGER",
      Self::Double => "DOUBLE",
      Self::Varchar => "VARCHAR",
      Self::Boolean => "BOOLEAN",
      Self::Date => "DATE",
      Self::Timestamp => "TIMESTAMP",
    }
  }

  /// Coerce `value` to this type. Returns `None` if the value has no faithful
  /// representation in this type. `Null` coerces to `Null` for every type.
  pub fn coerce(self, value: &Value) -> Option<Value> {
    match (self, value) {
      (_, Value::Null) => Some(Value::Null),

      (Self::Integer, Value::Int(i)) => Some(Value::Int(*i)),
      (Self::Integer, Value::Float(f)) => float_to_int(*f).map(Value::Int),
      (Self::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Int),

      (Self::Double, Value::Int(i)) => finite(*i as f64),
      (Self::Double, Value::Float(f)) => finite(*f),
      (Self::Double, Value::Text(s)) => s.trim().parse().ok().and_then(finite),

      (Self::Varchar, Value::Text(s)) => Some(Value::Text(s.clone())),
      (Self::Varchar, other) => Some(Value::Text(match other {
        Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        Value::Timestamp(t) => t.to_rfc3339(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Null | Value::Text(_) => return None,
      })),

      (Self::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
      (Self::Boolean, Value::Int(0)) => Some(Value::Bool(false)),
      (Self::Boolean, Value::Int(1)) => Some(Value::Bool(true)),
      (Self::Boolean, Value::Text(s)) => parse_bool(s).map(Value::Bool),

      (Self::Date, Value::Date(d)) => Some(Value::Date(*d)),
      (Self::Date, Value::Text(s)) => {
        NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok().map(Value::Date)
      }

      (Self::Timestamp, Value::Timestamp(t)) => Some(Value::Timestamp(*t)),
      (Self::Timestamp, Value::Date(d)) => {
        Some(Value::Timestamp(d.and_time(NaiveTime::MIN).and_utc()))
      }
      (Self::Timestamp, Value::Text(s)) => parse_timestamp(s.trim()).map(Value::Timestamp),

      _ => None,
    }
  }
}

fn finite(f: f64) -> Option<Value> {
  // -0.0 and 0.0 must hash identically.
  f.is_finite().then_some(Value::Float(if f == 0.0 { 0.0 } else { f }))
}

fn float_to_int(f: f64) -> Option<i64> {
  let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
  (f.is_finite() && f.fract() == 0.0 && in_range).then_some(f as i64)
}

fn parse_bool(s: &str) -> Option<bool> {
  match s.trim().to_ascii_lowercase().as_str() {
    "true" | "t" | "yes" | "y" | "1" => Some(true),
    "false" | "f" | "no" | "n" | "0" => Some(false),
    _ => None,
  }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|naive| naive.and_utc())
    .or_else(|| {
      NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
    })
}

impl fmt::Display for ColumnType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Parses SQL-style type names, e.g. `BIGINT`, `VARCHAR(255)`, `DECIMAL(10,2)`.
impl FromStr for ColumnType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let upper = s.trim().to_ascii_uppercase();
    let base = match upper.split_once('(') {
      Some((base, params)) => {
        let well_formed = params.strip_suffix(')').is_some_and(|inner| {
          !inner.trim().is_empty()
            && inner.chars().all(|c| c.is_ascii_digit() || c == ',' || c == ' ')
        });
        if !well_formed {
          return Err(Error::InvalidColumnType(s.to_owned()));
        }
        base.trim_end()
      }
      None => upper.as_str(),
    };

    match base {
      "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" => Ok(Self::Integer),
      "DOUBLE" | "FLOAT" | "REAL" | "DECIMAL" | "NUMERIC" => Ok(Self::Double),
      "VARCHAR" | "TEXT" | "STRING" | "CHAR" => Ok(Self::Varchar),
      "BOOLEAN" | "BOOL" => Ok(Self::Boolean),
      "DATE" => Ok(Self::Date),
      "TIMESTAMP" | "DATETIME" | "TIMESTAMPTZ" => Ok(Self::Timestamp),
      _ => Err(Error::InvalidColumnType(s.to_owned())),
    }
  }
}

impl Serialize for ColumnType {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for ColumnType {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_sql_type_names() {
    assert_eq!("integer".parse::<ColumnType>().unwrap(), ColumnType::Integer);
    assert_eq!("BIGINT".parse::<ColumnType>().unwrap(), ColumnType::Integer);
    assert_eq!("VARCHAR(255)".parse::<ColumnType>().unwrap(), ColumnType::Varchar);
    assert_eq!("DECIMAL(10,2)".parse::<ColumnType>().unwrap(), ColumnType::Double);
    assert_eq!("timestamp".parse::<ColumnType>().unwrap(), ColumnType::Timestamp);
  }

  #[test]
  fn rejects_unknown_or_malformed_types() {
    assert!("BLOB".parse::<ColumnType>().is_err());
    assert!("VARCHAR(abc)".parse::<ColumnType>().is_err());
    assert!("VARCHAR(".parse::<ColumnType>().is_err());
  }

  #[test]
  fn integer_coercion_normalises_representations() {
    let t = ColumnType::Integer;
    assert_eq!(t.coerce(&Value::Int(1)), Some(Value::Int(1)));
    assert_eq!(t.coerce(&Value::Float(1.0)), Some(Value::Int(1)));
    assert_eq!(t.coerce(&Value::from(" 1 ")), Some(Value::Int(1)));
    assert_eq!(t.coerce(&Value::Float(1.5)), None);
    assert_eq!(t.coerce(&Value::from("one")), None);
    assert_eq!(t.coerce(&Value::Bool(true)), None);
  }

  #[test]
  fn varchar_coercion_keeps_empty_string_distinct_from_null() {
    let t = ColumnType::Varchar;
    assert_eq!(t.coerce(&Value::from("")), Some(Value::from("")));
    assert_eq!(t.coerce(&Value::Null), Some(Value::Null));
    assert_ne!(Value::from(""), Value::Null);
  }

  #[test]
  fn date_and_timestamp_coercion() {
    let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    assert_eq!(ColumnType::Date.coerce(&Value::from("2024-03-01")), Some(Value::Date(d)));
    assert_eq!(ColumnType::Date.coerce(&Value::from("03/01/2024")), None);

    let ts = ColumnType::Timestamp
      .coerce(&Value::from("2024-03-01T12:00:00+02:00"))
      .unwrap();
    assert_eq!(ts, Value::Timestamp("2024-03-01T10:00:00Z".parse().unwrap()));
    assert_eq!(
      ColumnType::Timestamp.coerce(&Value::Date(d)),
      Some(Value::Timestamp("2024-03-01T00:00:00Z".parse().unwrap()))
    );
  }

  #[test]
  fn double_rejects_non_finite() {
    assert_eq!(ColumnType::Double.coerce(&Value::from("NaN")), None);
    assert_eq!(ColumnType::Double.coerce(&Value::Int(2)), Some(Value::Float(2.0)));
  }

  #[test]
  fn deserialises_json_scalars() {
    let record: Record =
      serde_json::from_str(r#"{"a": null, "b": true, "c": 7, "d": 1.5, "e": "x"}"#).unwrap();
    assert_eq!(record["a"], Value::Null);
    assert_eq!(record["b"], Value::Bool(true));
    assert_eq!(record["c"], Value::Int(7));
    assert_eq!(record["d"], Value::Float(1.5));
    assert_eq!(record["e"], Value::from("x"));
    assert!(serde_json::from_str::<Record>(r#"{"a": [1]}"#).is_err());
  }
}
