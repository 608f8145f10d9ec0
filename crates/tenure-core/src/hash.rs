//! Row fingerprints over tracked columns.
//!
//! The fingerprint is a SHA-256 digest over the tracked columns sorted by
//! name. Each column contributes its length-prefixed name followed by the
//! value's canonical encoding (see [`Value::write_canonical`]), so the result
//! does not depend on the order columns were presented in and `NULL` never
//! collides with `""`.
//!
//! Equal fingerprints are treated as equal tracked content. A SHA-256
//! collision would hide a change; that approximation is accepted.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha2::{Digest, Sha256};

use crate::value::{Record, Value};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowHash([u8; 32]);

impl RowHash {
  pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }

  pub fn to_hex(&self) -> String { hex::encode(self.0) }

  pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out)?;
    Ok(Self(out))
  }
}

impl fmt::Display for RowHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_hex()) }
}

impl fmt::Debug for RowHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "RowHash({})", self.to_hex())
  }
}

impl Serialize for RowHash {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for RowHash {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Self::from_hex(&s).map_err(de::Error::custom)
  }
}

/// Fingerprint the `tracked` columns of `record`. Absent columns hash as null.
pub fn row_hash<'a>(record: &Record, tracked: impl IntoIterator<Item = &'a str>) -> RowHash {
  let mut names: Vec<&str> = tracked.into_iter().collect();
  names.sort_unstable();
  names.dedup();

  let mut hasher = Sha256::new();
  let mut buf = Vec::new();
  for name in names {
    buf.clear();
    buf.extend_from_slice(&(name.len() as u64).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    record.get(name).unwrap_or(&Value::Null).write_canonical(&mut buf);
    hasher.update(&buf);
  }

  let mut out = [0u8; 32];
  out.copy_from_slice(&hasher.finalize());
  RowHash(out)
}
