//! WEIR PG - PostgreSQL durable store
//!
//! Implements the [`DurableStore`](weir_core::DurableStore) trait over a
//! deadpool-postgres pool. Thin, but the version semantics here are
//! load-bearing: the insert-or-increment transaction and the
//! monotonic-guard writeback are what keep the cache and the store
//! converging under concurrent writers.

pub mod store;

pub use store::{PgConfig, PgStore};
