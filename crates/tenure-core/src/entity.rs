//! Entity metadata: the declared shape of a dimension.
//!
//! An [`EntityMeta`] is what the metadata catalog stores. The versioning
//! engine only works with a [`Dimension`], the validated view of a
//! `type2_dimension` entity with its columns split into business key, tracked,
//! and untracked sets.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, value::ColumnType, version::surrogate_key_column};

/// Identifiers longer than this are rejected (PostgreSQL/DuckDB limit).
pub const MAX_IDENTIFIER_LEN: usize = 63;

// ─── Entity type ─────────────────────────────────────────────────────────────

/// How an entity is materialised. Only [`EntityType::Type2Dimension`] is
/// handled by the versioning engine.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
  Fact,
  Dimension,
  #[serde(rename = "type2_dimension")]
  #[strum(serialize = "type2_dimension")]
  Type2Dimension,
}

// ─── Columns ─────────────────────────────────────────────────────────────────

fn default_nullable() -> bool { true }

/// Declared metadata for one entity column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
  pub name:          String,
  pub data_type:     ColumnType,
  #[serde(default = "default_nullable")]
  pub nullable:      bool,
  /// Part of the (possibly composite) business key. Key order follows column
  /// declaration order.
  #[serde(default)]
  pub business_key:  bool,
  /// Changes to this column open a new version.
  #[serde(default)]
  pub track_history: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description:   Option<String>,
}

impl ColumnMeta {
  pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
    Self {
      name: name.into(),
      data_type,
      nullable: true,
      business_key: false,
      track_history: false,
      description: None,
    }
  }

  /// Mark as a business key column. Key columns are never nullable.
  pub fn business_key(mut self) -> Self {
    self.business_key = true;
    self.nullable = false;
    self
  }

  pub fn tracked(mut self) -> Self {
    self.track_history = true;
    self
  }

  pub fn not_null(mut self) -> Self {
    self.nullable = false;
    self
  }

  pub fn describe(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }
}

// ─── Entity ──────────────────────────────────────────────────────────────────

/// Declared metadata for an entity, as held by the metadata catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
  pub name:        String,
  pub entity_type: EntityType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub columns:     Vec<ColumnMeta>,
}

impl EntityMeta {
  pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
    Self {
      name: name.into(),
      entity_type,
      description: None,
      columns: Vec::new(),
    }
  }

  /// Shorthand for a `type2_dimension` entity.
  pub fn type2(name: impl Into<String>) -> Self {
    Self::new(name, EntityType::Type2Dimension)
  }

  pub fn column(mut self, column: ColumnMeta) -> Self {
    self.columns.push(column);
    self
  }

  pub fn describe(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  /// Structural checks that apply to every entity type: identifiers are
  /// valid, column names are unique and do not collide with derived columns.
  /// A `type2_dimension` additionally has to pass [`Dimension::try_from`].
  pub fn validate(&self) -> Result<()> {
    validate_identifier(&self.name, "entity name")?;

    let surrogate = surrogate_key_column(&self.name);
    let mut seen = HashSet::new();
    for column in &self.columns {
      validate_identifier(&column.name, "column name")?;
      if column.name.starts_with('_') || column.name == surrogate {
        return Err(Error::ReservedColumn {
          entity: self.name.clone(),
          column: column.name.clone(),
        });
      }
      if !seen.insert(column.name.as_str()) {
        return Err(Error::DuplicateColumn {
          entity: self.name.clone(),
          column: column.name.clone(),
        });
      }
    }

    if self.entity_type == EntityType::Type2Dimension {
      Dimension::try_from(self)?;
    }
    Ok(())
  }
}

/// Check that `ident` is safe to splice into SQL as a table or column name.
pub fn validate_identifier<'a>(ident: &'a str, kind: &'static str) -> Result<&'a str> {
  let invalid = |reason| Error::InvalidIdentifier { kind, name: ident.to_owned(), reason };

  let mut chars = ident.chars();
  match chars.next() {
    None => return Err(invalid("must not be empty")),
    Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
      return Err(invalid("must start with a letter or underscore"));
    }
    Some(_) => {}
  }
  if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
    return Err(invalid("may only contain letters, digits and underscores"));
  }
  if ident.len() > MAX_IDENTIFIER_LEN {
    return Err(invalid("is longer than 63 characters"));
  }
  Ok(ident)
}

// ─── Dimension ───────────────────────────────────────────────────────────────

/// A validated `type2_dimension` entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
  name:      String,
  key:       Vec<ColumnMeta>,
  tracked:   Vec<ColumnMeta>,
  untracked: Vec<ColumnMeta>,
}

impl Dimension {
  pub fn name(&self) -> &str { &self.name }

  /// Business key columns in declaration order.
  pub fn key_columns(&self) -> &[ColumnMeta] { &self.key }

  /// Columns that participate in the row hash.
  pub fn tracked_columns(&self) -> &[ColumnMeta] { &self.tracked }

  pub fn untracked_columns(&self) -> &[ColumnMeta] { &self.untracked }

  /// Tracked then untracked columns.
  pub fn attribute_columns(&self) -> impl Iterator<Item = &ColumnMeta> {
    self.tracked.iter().chain(&self.untracked)
  }

  /// Every user column: key, tracked, untracked.
  pub fn columns(&self) -> impl Iterator<Item = &ColumnMeta> {
    self.key.iter().chain(self.attribute_columns())
  }

  /// The `{entity}_key` column name.
  pub fn surrogate_key_column(&self) -> String { surrogate_key_column(&self.name) }
}

impl TryFrom<&EntityMeta> for Dimension {
  type Error = Error;

  fn try_from(meta: &EntityMeta) -> Result<Self> {
    validate_identifier(&meta.name, "entity name")?;
    if meta.entity_type != EntityType::Type2Dimension {
      return Err(Error::NotVersioned {
        entity: meta.name.clone(),
        found:  meta.entity_type,
      });
    }

    let mut key = Vec::new();
    let mut flagged = Vec::new();
    let mut rest = Vec::new();
    for column in &meta.columns {
      match (column.business_key, column.track_history) {
        (true, true) => {
          return Err(Error::TrackedKeyColumn {
            entity: meta.name.clone(),
            column: column.name.clone(),
          });
        }
        (true, false) => key.push(ColumnMeta { nullable: false, ..column.clone() }),
        (false, true) => flagged.push(column.clone()),
        (false, false) => rest.push(column.clone()),
      }
    }

    if key.is_empty() {
      return Err(Error::MissingBusinessKey(meta.name.clone()));
    }

    // Without explicit flags every attribute is historised.
    let (tracked, untracked) = if flagged.is_empty() {
      (rest, Vec::new())
    } else {
      (flagged, rest)
    };

    Ok(Self { name: meta.name.clone(), key, tracked, untracked })
  }
}
