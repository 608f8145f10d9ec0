//! Handlers for `/entities` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/entities` | Every registered entity |
//! | `POST` | `/entities` | Body: [`EntityMeta`]; 201 when created, 200 when already registered |
//! | `GET`  | `/entities/{name}` | One entity definition |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use tenure_core::{engine::VersioningEngine, entity::EntityMeta, store::DimensionStore};

use crate::error::ApiError;

/// `GET /entities`
pub async fn list<S: DimensionStore>(
  State(engine): State<Arc<VersioningEngine<S>>>,
) -> Result<Json<Vec<EntityMeta>>, ApiError> {
  Ok(Json(engine.list_entities().await?))
}

/// `POST /entities`
pub async fn register<S: DimensionStore>(
  State(engine): State<Arc<VersioningEngine<S>>>,
  Json(meta): Json<EntityMeta>,
) -> Result<impl IntoResponse, ApiError> {
  let created = engine.register_entity(meta.clone()).await?;
  let status = if created { StatusCode::CREATED } else { StatusCode::OK };
  Ok((status, Json(meta)))
}

/// `GET /entities/{name}`
pub async fn get_one<S: DimensionStore>(
  State(engine): State<Arc<VersioningEngine<S>>>,
  Path(name): Path<String>,
) -> Result<Json<EntityMeta>, ApiError> {
  Ok(Json(engine.entity(&name).await?))
}
