//! [`SqliteStore`]: the SQLite implementation of [`DimensionStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, OptionalExtension as _, types::Value as SqlValue};

use tenure_core::{
  allocator::SurrogateKey,
  entity::{Dimension, EntityMeta, EntityType},
  key::BusinessKey,
  store::{ChangeSet, CommitAck, DimensionStore},
  version::{IS_CURRENT, VALID_FROM, VALID_TO, VersionRow},
};

use crate::{
  Error, Result,
  encode::{
    RawColumn, RawEntity, RawVersion, encode_business_key, encode_dt, encode_value,
    encode_version,
  },
  schema::{self, BUSINESS_KEY, CATALOG_TABLES, SCHEMA, quote},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tenure dimension store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// Result of a registration attempt, decided inside the transaction.
enum Registration {
  Created,
  Unchanged,
  Conflict,
  /// The name matches another entity or schema object once case is ignored.
  Collision,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run a `SELECT` over a dimension table and decode the rows.
  async fn select_versions(
    &self,
    dimension: &Dimension,
    filter: &str,
    order: &str,
    params: Vec<SqlValue>,
  ) -> Result<Vec<VersionRow>> {
    let sql = format!(
      "SELECT {} FROM {} WHERE {filter} ORDER BY {order}",
      schema::select_list(dimension),
      quote(dimension.name()),
    );
    let user_columns = dimension.columns().count();

    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            RawVersion::from_row(row, user_columns)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|raw| raw.into_version(dimension)).collect()
  }
}

fn load_entity(conn: &rusqlite::Connection, name: &str) -> rusqlite::Result<Option<RawEntity>> {
  let head: Option<(String, String, Option<String>)> = conn
    .query_row(
      "SELECT entity_name, entity_type, description FROM entity_metadata WHERE entity_name = ?1",
      rusqlite::params![name],
      |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()?;
  let Some((name, entity_type, description)) = head else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT column_name, data_type, is_nullable, is_business_key, track_history, description
     FROM entity_column_metadata WHERE entity_name = ?1 ORDER BY ordinal",
  )?;
  let columns = stmt
    .query_map(rusqlite::params![name], |row| {
      Ok(RawColumn {
        name:          row.get(0)?,
        data_type:     row.get(1)?,
        nullable:      row.get(2)?,
        business_key:  row.get(3)?,
        track_history: row.get(4)?,
        description:   row.get(5)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Some(RawEntity { name, entity_type, description, columns }))
}

/// SQLite resolves table and index names without regard to case, so
/// `Customer` and `customer` would share one table. Called after an exact
/// match has been ruled out.
fn name_collides(
  conn: &rusqlite::Connection,
  name: &str,
  objects: &[String],
) -> rusqlite::Result<bool> {
  let entity: bool = conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM entity_metadata WHERE entity_name = ?1 COLLATE NOCASE)",
    [name],
    |row| row.get(0),
  )?;
  if entity {
    return Ok(true);
  }
  let mut stmt =
    conn.prepare("SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE name = ?1 COLLATE NOCASE)")?;
  for object in objects {
    if stmt.query_row([object], |row| row.get::<_, bool>(0))? {
      return Ok(true);
    }
  }
  Ok(false)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
  e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

// ─── DimensionStore impl ─────────────────────────────────────────────────────

impl DimensionStore for SqliteStore {
  type Error = Error;

  // ── Metadata ──────────────────────────────────────────────────────────────

  async fn register_entity(&self, meta: EntityMeta) -> Result<bool> {
    meta.validate()?;
    if CATALOG_TABLES.contains(&meta.name.as_str()) {
      return Err(Error::Core(tenure_core::Error::InvalidIdentifier {
        kind:   "entity name",
        name:   meta.name,
        reason: "is reserved by the catalog",
      }));
    }

    let (ddl, objects) = match meta.entity_type {
      EntityType::Type2Dimension => (
        Some(schema::dimension_ddl(&Dimension::try_from(&meta)?)),
        schema::dimension_objects(&meta.name).to_vec(),
      ),
      EntityType::Fact | EntityType::Dimension => (None, vec![meta.name.clone()]),
    };
    let raw = RawEntity::from_meta(&meta);
    let created_at = encode_dt(Utc::now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if let Some(existing) = load_entity(&tx, &raw.name)? {
          return Ok(if existing == raw {
            Registration::Unchanged
          } else {
            Registration::Conflict
          });
        }
        if name_collides(&tx, &raw.name, &objects)? {
          return Ok(Registration::Collision);
        }

        tx.execute(
          "INSERT INTO entity_metadata (entity_name, entity_type, description, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![raw.name, raw.entity_type, raw.description, created_at],
        )?;
        for (ordinal, column) in raw.columns.iter().enumerate() {
          tx.execute(
            "INSERT INTO entity_column_metadata
               (entity_name, column_name, ordinal, data_type, is_nullable,
                is_business_key, track_history, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
              raw.name,
              column.name,
              ordinal as i64,
              column.data_type,
              column.nullable,
              column.business_key,
              column.track_history,
              column.description,
            ],
          )?;
        }
        if let Some(ddl) = ddl {
          tx.execute_batch(&ddl)?;
        }
        tx.commit()?;
        Ok(Registration::Created)
      })
      .await?;

    match outcome {
      Registration::Created => {
        tracing::debug!(entity = %meta.name, "created entity tables");
        Ok(true)
      }
      Registration::Unchanged => Ok(false),
      Registration::Conflict => Err(Error::Core(tenure_core::Error::EntityConflict(meta.name))),
      Registration::Collision => Err(Error::Core(tenure_core::Error::InvalidIdentifier {
        kind:   "entity name",
        name:   meta.name,
        reason: "collides with an existing entity, table or index",
      })),
    }
  }

  async fn entity(&self, name: &str) -> Result<Option<EntityMeta>> {
    let name = name.to_owned();
    let raw = self.conn.call(move |conn| Ok(load_entity(conn, &name)?)).await?;
    raw.map(RawEntity::into_meta).transpose()
  }

  async fn list_entities(&self) -> Result<Vec<EntityMeta>> {
    let raws: Vec<RawEntity> = self
      .conn
      .call(|conn| {
        let names = conn
          .prepare("SELECT entity_name FROM entity_metadata ORDER BY entity_name")?
          .query_map([], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut raws = Vec::with_capacity(names.len());
        for name in names {
          raws.extend(load_entity(conn, &name)?);
        }
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(RawEntity::into_meta).collect()
  }

  // ── Versioning ────────────────────────────────────────────────────────────

  async fn read_current_rows(
    &self,
    dimension: &Dimension,
    keys: &[BusinessKey],
  ) -> Result<Vec<VersionRow>> {
    if keys.is_empty() {
      return Ok(Vec::new());
    }
    let sql = format!(
      "SELECT {} FROM {} WHERE {} = 1 AND {} = ?1",
      schema::select_list(dimension),
      quote(dimension.name()),
      quote(IS_CURRENT),
      quote(BUSINESS_KEY),
    );
    let encoded = keys.iter().map(encode_business_key).collect::<Result<Vec<_>>>()?;
    let user_columns = dimension.columns().count();

    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut raws = Vec::new();
        for key in &encoded {
          let row = stmt
            .query_row(rusqlite::params![key], |row| RawVersion::from_row(row, user_columns))
            .optional()?;
          raws.extend(row);
        }
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(|raw| raw.into_version(dimension)).collect()
  }

  async fn last_surrogate_key(&self, dimension: &Dimension) -> Result<Option<SurrogateKey>> {
    let sql = format!(
      "SELECT MAX(
         COALESCE((SELECT last_value FROM surrogate_sequences WHERE entity_name = ?1), 0),
         COALESCE((SELECT MAX({}) FROM {}), 0)
       )",
      quote(&dimension.surrogate_key_column()),
      quote(dimension.name()),
    );
    let name = dimension.name().to_owned();

    let last: i64 = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, rusqlite::params![name], |row| row.get(0))?))
      .await?;

    Ok((last > 0).then_some(SurrogateKey(last)))
  }

  #[tracing::instrument(skip_all, fields(entity = %dimension.name()))]
  async fn commit(&self, dimension: &Dimension, changes: ChangeSet) -> Result<CommitAck> {
    let table = quote(dimension.name());
    let surrogate = quote(&dimension.surrogate_key_column());
    let close_sql = format!(
      "UPDATE {table} SET {} = ?1, {} = 0 WHERE {surrogate} = ?2 AND {} = ?3 AND {} = 1",
      quote(VALID_TO),
      quote(IS_CURRENT),
      quote(BUSINESS_KEY),
      quote(IS_CURRENT),
    );
    let insert_sql = schema::insert_sql(dimension);

    let closures = changes
      .closures
      .iter()
      .map(|c| {
        Ok((
          encode_dt(c.valid_to),
          c.surrogate_key.0,
          encode_business_key(&c.business_key)?,
        ))
      })
      .collect::<Result<Vec<_>>>()?;
    let inserts = changes
      .inserts
      .iter()
      .map(|row| encode_version(dimension, row))
      .collect::<Result<Vec<_>>>()?;
    // Only declared untracked columns may be refreshed.
    let refreshes = changes
      .refreshes
      .iter()
      .map(|r| {
        let (assignments, mut params): (Vec<String>, Vec<SqlValue>) = dimension
          .untracked_columns()
          .iter()
          .filter_map(|c| r.attributes.get(&c.name).map(|v| (c, v)))
          .enumerate()
          .map(|(i, (c, v))| (format!("{} = ?{}", quote(&c.name), i + 1), encode_value(v)))
          .unzip();
        let n = params.len();
        let sql = format!(
          "UPDATE {table} SET {} WHERE {surrogate} = ?{} AND {} = ?{} AND {} = 1",
          assignments.join(", "),
          n + 1,
          quote(BUSINESS_KEY),
          n + 2,
          quote(IS_CURRENT),
        );
        params.push(SqlValue::Integer(r.surrogate_key.0));
        params.push(SqlValue::Text(encode_business_key(&r.business_key)?));
        Ok((assignments.is_empty(), sql, params))
      })
      .collect::<Result<Vec<_>>>()?;
    let entity = changes.entity.clone();
    let last_issued = changes
      .inserts
      .iter()
      .map(|r| r.surrogate_key)
      .chain(changes.last_surrogate_key)
      .max();

    let ack: Option<CommitAck> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut ack = CommitAck::default();

        for (valid_to, surrogate_key, business_key) in &closures {
          let n = tx.execute(&close_sql, rusqlite::params![valid_to, surrogate_key, business_key])?;
          if n != 1 {
            return Ok(None);
          }
          ack.closed += 1;
        }

        for (empty, sql, params) in &refreshes {
          if *empty {
            continue;
          }
          let n = tx.execute(sql, rusqlite::params_from_iter(params))?;
          if n != 1 {
            return Ok(None);
          }
          ack.refreshed += 1;
        }

        {
          let mut stmt = tx.prepare(&insert_sql)?;
          for params in &inserts {
            match stmt.execute(rusqlite::params_from_iter(params)) {
              Ok(_) => ack.inserted += 1,
              Err(e) if is_constraint_violation(&e) => return Ok(None),
              Err(e) => return Err(e.into()),
            }
          }
        }

        if let Some(last) = last_issued {
          tx.execute(
            "INSERT INTO surrogate_sequences (entity_name, last_value) VALUES (?1, ?2)
             ON CONFLICT (entity_name) DO UPDATE SET last_value = MAX(last_value, excluded.last_value)",
            rusqlite::params![entity, last.0],
          )?;
        }

        tx.commit()?;
        Ok(Some(ack))
      })
      .await?;

    let ack = ack.ok_or_else(|| Error::Conflict(changes.entity))?;
    tracing::debug!(
      closed = ack.closed,
      inserted = ack.inserted,
      refreshed = ack.refreshed,
      "committed change set"
    );
    Ok(ack)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn history(&self, dimension: &Dimension, key: &BusinessKey) -> Result<Vec<VersionRow>> {
    let filter = format!("{} = ?1", quote(BUSINESS_KEY));
    let order = format!("{}, {}", quote(VALID_FROM), quote(&dimension.surrogate_key_column()));
    let params = vec![SqlValue::Text(encode_business_key(key)?)];
    self.select_versions(dimension, &filter, &order, params).await
  }

  async fn current_rows(&self, dimension: &Dimension) -> Result<Vec<VersionRow>> {
    let filter = format!("{} = 1", quote(IS_CURRENT));
    let order = quote(&dimension.surrogate_key_column());
    self.select_versions(dimension, &filter, &order, Vec::new()).await
  }

  async fn as_of(&self, dimension: &Dimension, at: DateTime<Utc>) -> Result<Vec<VersionRow>> {
    let filter = format!(
      "{from} <= ?1 AND ({to} IS NULL OR ?1 < {to})",
      from = quote(VALID_FROM),
      to = quote(VALID_TO),
    );
    let order = quote(&dimension.surrogate_key_column());
    let params = vec![SqlValue::Text(encode_dt(at))];
    self.select_versions(dimension, &filter, &order, params).await
  }
}
