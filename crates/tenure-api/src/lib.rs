//! JSON REST API for Tenure.
//!
//! Exposes an axum [`Router`] over a [`VersioningEngine`] backed by any
//! [`DimensionStore`]. Auth, TLS, and transport concerns are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tenure_api::api_router(engine.clone()))
//! ```

pub mod batches;
pub mod entities;
pub mod error;
pub mod history;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;
use tenure_core::{
  config::EngineConfig,
  engine::VersioningEngine,
  entity::EntityMeta,
  store::DimensionStore,
};

pub use error::ApiError;

// ─── Configuration ────────────────────────────────────────────────────────────

fn default_store_path() -> PathBuf { PathBuf::from("tenure.db") }
fn default_host() -> String { "127.0.0.1".to_owned() }
fn default_port() -> u16 { 8088 }

/// Runtime server configuration, deserialised from `tenure.toml` and
/// `TENURE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  #[serde(default)]
  pub engine:     EngineConfig,
  /// Registered at startup; already-registered identical definitions are
  /// left alone.
  #[serde(default)]
  pub entities:   Vec<EntityMeta>,
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(engine: Arc<VersioningEngine<S>>) -> Router<()>
where
  S: DimensionStore + 'static,
{
  Router::new()
    // Metadata
    .route("/entities", get(entities::list::<S>).post(entities::register::<S>))
    .route("/entities/{name}", get(entities::get_one::<S>))
    // Writes
    .route("/entities/{name}/batches", post(batches::apply::<S>))
    // Reads
    .route("/entities/{name}/current", get(history::current::<S>))
    .route("/entities/{name}/history", get(history::member::<S>))
    .route("/entities/{name}/as-of", get(history::as_of::<S>))
    .with_state(engine)
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use chrono::{DateTime, Utc};
  use serde_json::{Value, json};
  use tenure_core::{clock::FixedClock, engine::VersioningEngine, memory::MemoryStore};
  use tower::ServiceExt as _;

  use super::api_router;

  fn t(s: &str) -> DateTime<Utc> { s.parse().unwrap() }

  fn engine() -> Arc<VersioningEngine<MemoryStore>> {
    let clock = Arc::new(FixedClock::new(t("2024-03-01T00:00:00Z")));
    Arc::new(VersioningEngine::new(Arc::new(MemoryStore::new())).with_clock(clock))
  }

  fn customer() -> Value {
    json!({
      "name": "customer",
      "entity_type": "type2_dimension",
      "columns": [
        {"name": "customer_id", "data_type": "BIGINT", "business_key": true, "nullable": false},
        {"name": "name", "data_type": "VARCHAR(255)", "track_history": true},
        {"name": "city", "data_type": "VARCHAR", "track_history": true},
        {"name": "last_login", "data_type": "TIMESTAMP"}
      ]
    })
  }

  async fn call(
    engine: &Arc<VersioningEngine<MemoryStore>>,
    method: &str,
    uri: &str,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let resp = api_router(engine.clone())
      .oneshot(builder.body(body).unwrap())
      .await
      .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
  }

  async fn registered() -> Arc<VersioningEngine<MemoryStore>> {
    let engine = engine();
    let (status, _) = call(&engine, "POST", "/entities", Some(customer())).await;
    assert_eq!(status, StatusCode::CREATED);
    engine
  }

  // ── Entities ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn register_is_idempotent_and_listed() {
    let engine = registered().await;
    let (status, _) = call(&engine, "POST", "/entities", Some(customer())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&engine, "GET", "/entities", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(&engine, "GET", "/entities/customer", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["columns"][0]["data_type"], "INTEGER");
  }

  #[tokio::test]
  async fn conflicting_registration_is_409() {
    let engine = registered().await;
    let mut changed = customer();
    changed["columns"][1]["track_history"] = json!(false);
    let (status, _) = call(&engine, "POST", "/entities", Some(changed)).await;
    assert_eq!(status, StatusCode::CONFLICT);
  }

  #[tokio::test]
  async fn entity_without_business_key_is_400() {
    let engine = engine();
    let body = json!({
      "name": "orphan",
      "entity_type": "type2_dimension",
      "columns": [{"name": "x", "data_type": "INTEGER"}]
    });
    let (status, body) = call(&engine, "POST", "/entities", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("business key"));
  }

  #[tokio::test]
  async fn unknown_entity_is_404() {
    let engine = engine();
    let (status, _) = call(&engine, "GET", "/entities/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&engine, "GET", "/entities/nope/current", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  // ── Batches and reads ───────────────────────────────────────────────────────

  #[tokio::test]
  async fn batches_version_members_and_reads_render_columns() {
    let engine = registered().await;

    let first = json!({
      "as_of": "2024-01-01T00:00:00Z",
      "rows": [
        {"customer_id": 1, "name": "Alice", "city": "NYC", "last_login": null},
        {"customer_id": 2, "name": "Bob", "city": "LA", "last_login": null}
      ]
    });
    let (status, out) = call(&engine, "POST", "/entities/customer/batches", Some(first)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["inserted"], 2);
    assert_eq!(out["stats"]["new_rows"], 2);

    let second = json!({
      "as_of": "2024-02-01T00:00:00Z",
      "rows": [{"customer_id": "1", "name": "Alice", "city": "Boston", "last_login": null}]
    });
    let (status, out) = call(&engine, "POST", "/entities/customer/batches", Some(second)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!((out["closed"].as_u64(), out["inserted"].as_u64()), (Some(1), Some(1)));
    assert_eq!(out["classifications"][0]["kind"], "CHANGED");

    let (status, rows) = call(&engine, "GET", "/entities/customer/history?customer_id=1", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["customer_key"], 1);
    assert_eq!(rows[0]["_is_current"], false);
    assert_eq!(rows[0]["_valid_to"], rows[1]["_valid_from"]);
    assert_eq!(rows[1]["city"], "Boston");
    assert_eq!(rows[1]["_valid_to"], Value::Null);

    let (_, jan) =
      call(&engine, "GET", "/entities/customer/as-of?at=2024-01-15T00:00:00Z", None).await;
    let cities: Vec<_> = jan.as_array().unwrap().iter().map(|r| r["city"].clone()).collect();
    assert!(cities.contains(&json!("NYC")));

    let (_, current) = call(&engine, "GET", "/entities/customer/current", None).await;
    assert_eq!(current.as_array().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn batch_without_as_of_uses_engine_clock() {
    let engine = registered().await;
    let body = json!({"rows": [{"customer_id": 7, "name": "Gil", "city": "SF"}]});
    let (status, out) = call(&engine, "POST", "/entities/customer/batches", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["as_of"], "2024-03-01T00:00:00Z");
  }

  #[tokio::test]
  async fn rejected_batch_is_422_with_every_failing_row() {
    let engine = registered().await;
    let body = json!({
      "rows": [
        {"customer_id": null, "name": "Nobody", "city": "X"},
        {"customer_id": 3, "name": "Carol", "city": "Y"},
        {"name": "Keyless", "city": "Z"}
      ]
    });
    let (status, out) = call(&engine, "POST", "/entities/customer/batches", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let rejected = out["rejected"].as_array().unwrap();
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0]["index"], 0);
    assert_eq!(rejected[0]["errors"][0]["kind"], "invalid_key");
    assert_eq!(rejected[1]["errors"][0]["kind"], "schema_mismatch");

    let (_, current) = call(&engine, "GET", "/entities/customer/current", None).await;
    assert_eq!(current, json!([]));
  }

  #[tokio::test]
  async fn history_requires_every_key_column() {
    let engine = registered().await;
    let (status, _) = call(&engine, "GET", "/entities/customer/history", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, out) =
      call(&engine, "GET", "/entities/customer/history?customer_id=abc", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(out["record"]["kind"], "invalid_key");
  }
}
