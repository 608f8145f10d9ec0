//! Core types and the versioning engine for Tenure, a Type-2 slowly changing
//! dimension store.
//!
//! This crate is free of HTTP and database dependencies. Storage backends
//! implement [`store::DimensionStore`]; everything else depends on that trait
//! and on [`engine::VersioningEngine`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod allocator;
pub mod batch;
pub mod clock;
pub mod config;
pub mod detect;
pub mod engine;
pub mod entity;
pub mod error;
pub mod hash;
pub mod key;
pub mod memory;
pub mod store;
pub mod value;
pub mod version;

pub use error::{Error, Result};
