//! WEIR Core - Shared types for the weir cache proxy
//!
//! Defines the error taxonomy, the tagged replies produced by the atomic
//! cache scripts, and the traits implemented by the cache tier and the
//! durable store. The Redis implementation lives in weir-redis, the
//! PostgreSQL implementation in weir-pg, and the proxy itself in
//! weir-proxy.

pub mod error;
pub mod reply;
pub mod traits;

pub use error::{WeirError, WeirResult};
pub use reply::{GetReply, LoadReply, SetReply};
pub use traits::{CacheTier, DurableStore};

/// Reserved hash key holding the dirty-key set.
///
/// Field = entry key, value = the entry's version at the time of the last
/// unflushed write. The name is part of the wire contract with existing
/// deployments and must not change.
pub const DIRTY_SET_KEY: &str = "__dirty__";

/// Reserved version meaning "confirmed absent in the durable store".
///
/// A negative-cache entry carries this version and never a value.
pub const NEGATIVE_VERSION: i64 = 0;
