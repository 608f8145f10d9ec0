//! tenure-server binary.
//!
//! Reads `tenure.toml` (or the path in `TENURE_CONFIG`) layered under
//! `TENURE_*` environment variables, opens an in-process SQLite store,
//! registers the configured entities, and serves the JSON API over HTTP.
//!
//! ```toml
//! store_path = "~/.local/share/tenure/tenure.db"
//! port       = 8088
//!
//! [engine]
//! lock_timeout_ms  = 5000
//! untracked_policy = "update_in_place"
//!
//! [[entities]]
//! name        = "customer"
//! entity_type = "type2_dimension"
//! columns     = [
//!   { name = "customer_id", data_type = "BIGINT", business_key = true, nullable = false },
//!   { name = "city", data_type = "VARCHAR", track_history = true },
//! ]
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use tenure_api::ServerConfig;
use tenure_core::engine::VersioningEngine;
use tenure_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  // Load configuration.
  let config_path = std::env::var_os("TENURE_CONFIG")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("tenure.toml"));
  let settings = config::Config::builder()
    .add_source(config::File::from(config_path).required(false))
    .add_source(config::Environment::with_prefix("TENURE").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);

  // Open SQLite store.
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let engine = Arc::new(
    VersioningEngine::new(Arc::new(store)).with_config(server_cfg.engine.clone()),
  );

  for meta in server_cfg.entities {
    let name = meta.name.clone();
    engine
      .register_entity(meta)
      .await
      .with_context(|| format!("failed to register entity {name}"))?;
  }

  let app = tenure_api::api_router(engine).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
