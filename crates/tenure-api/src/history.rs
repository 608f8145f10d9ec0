//! Read handlers over version rows.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/entities/{name}/current` | Current version of every member |
//! | `GET`  | `/entities/{name}/history` | One query parameter per business key column |
//! | `GET`  | `/entities/{name}/as-of` | `?at=<RFC 3339>` |
//!
//! Rows are rendered with their warehouse column names (`{entity}_key`,
//! `_valid_from`, `_valid_to`, `_is_current`, `_row_hash`, `_load_date`).

use std::{collections::HashMap, sync::Arc};

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tenure_core::{
  engine::VersioningEngine,
  entity::Dimension,
  store::DimensionStore,
  value::Value,
  version::VersionRow,
};

use crate::error::ApiError;

type Rows = Vec<Map<String, JsonValue>>;

fn render(dimension: &Dimension, rows: &[VersionRow]) -> Rows {
  rows.iter().map(|r| r.to_columns(dimension)).collect()
}

/// `GET /entities/{name}/current`
pub async fn current<S: DimensionStore>(
  State(engine): State<Arc<VersioningEngine<S>>>,
  Path(name): Path<String>,
) -> Result<Json<Rows>, ApiError> {
  let dimension = engine.dimension(&name).await?;
  let rows = engine.current_rows(&name).await?;
  Ok(Json(render(&dimension, &rows)))
}

/// `GET /entities/{name}/history?<key column>=<value>...`
///
/// Query values arrive as text and are coerced to the key column types.
pub async fn member<S: DimensionStore>(
  State(engine): State<Arc<VersioningEngine<S>>>,
  Path(name): Path<String>,
  Query(mut params): Query<HashMap<String, String>>,
) -> Result<Json<Rows>, ApiError> {
  let dimension = engine.dimension(&name).await?;
  let key = dimension
    .key_columns()
    .iter()
    .map(|c| {
      params
        .remove(&c.name)
        .map(Value::Text)
        .ok_or_else(|| ApiError::BadRequest(format!("missing key column {:?}", c.name)))
    })
    .collect::<Result<Vec<_>, _>>()?;
  let rows = engine.history(&name, key).await?;
  Ok(Json(render(&dimension, &rows)))
}

#[derive(Debug, Deserialize)]
pub struct AsOfParams {
  pub at: DateTime<Utc>,
}

/// `GET /entities/{name}/as-of?at=<RFC 3339>`
pub async fn as_of<S: DimensionStore>(
  State(engine): State<Arc<VersioningEngine<S>>>,
  Path(name): Path<String>,
  Query(params): Query<AsOfParams>,
) -> Result<Json<Rows>, ApiError> {
  let dimension = engine.dimension(&name).await?;
  let rows = engine.as_of(&name, params.at).await?;
  Ok(Json(render(&dimension, &rows)))
}
