//! SQLite backend for Tenure dimensions.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Each `type2_dimension` gets its own
//! table named after the entity, carrying the downstream column contract
//! (`{entity}_key`, `_valid_from`, `_valid_to`, `_is_current`, `_row_hash`,
//! `_load_date`).

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
