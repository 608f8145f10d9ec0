//! `POST /entities/{name}/batches`: apply a batch of source rows.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tenure_core::{
  engine::{ApplyOutcome, VersioningEngine},
  store::DimensionStore,
  value::Record,
};

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct BatchBody {
  pub rows:  Vec<Record>,
  /// Effective time of the batch. Defaults to the server clock.
  pub as_of: Option<DateTime<Utc>>,
}

/// Returns the [`ApplyOutcome`]. A rejected batch is a 422 listing every
/// failing row; a concurrency conflict is a 409 and may be resubmitted as is.
pub async fn apply<S: DimensionStore>(
  State(engine): State<Arc<VersioningEngine<S>>>,
  Path(name): Path<String>,
  Json(body): Json<BatchBody>,
) -> Result<Json<ApplyOutcome>, ApiError> {
  let outcome = match body.as_of {
    Some(at) => engine.apply_as_of(&name, body.rows, at).await?,
    None => engine.apply(&name, body.rows).await?,
  };
  Ok(Json(outcome))
}
