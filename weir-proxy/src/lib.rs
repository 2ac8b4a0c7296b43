//! WEIR Proxy - Versioned cache-aside / write-back data proxy
//!
//! Sits between a TTL-capable cache tier and a durable relational
//! store, making reads and writes consistent and crash-tolerant without
//! requiring the two to agree synchronously on every write.
//!
//! - Reads go cache-first; a genuine miss falls back to the store and
//!   repopulates the cache, with confirmed absences cached negatively.
//! - Writes hit the cache with CAS semantics and mark the key dirty;
//!   the write-back synchronizer later drains the dirty set into the
//!   store without losing or double-applying updates.
//!
//! The proxy is generic over the [`CacheTier`] and [`DurableStore`]
//! seams. Production backends are [`weir_redis::RedisCache`] and
//! [`weir_pg::PgStore`]; [`MemoryCache`] and [`MemoryStore`] provide an
//! embedded in-process pair.
//!
//! # Example
//!
//! ```ignore
//! let cache = RedisCache::from_config(&RedisConfig::from_env())?;
//! let store = PgStore::from_config(&PgConfig::from_env())?;
//! store.migrate().await?;
//!
//! let proxy = DataProxy::with_defaults(Arc::new(cache), Arc::new(store));
//! let version = proxy.set("hello", "world", None).await?;
//! let (value, version) = proxy.get("hello", None).await?;
//!
//! // Out of band, on a timer:
//! proxy.sync_dirty_to_db().await?;
//! ```

pub mod config;
pub mod memory;
pub mod proxy;

pub use config::ProxyConfig;
pub use memory::{MemoryCache, MemoryStore};
pub use proxy::DataProxy;

pub use weir_core::{
    CacheTier, DurableStore, GetReply, LoadReply, SetReply, WeirError, WeirResult,
};
pub use weir_pg::{PgConfig, PgStore};
pub use weir_redis::{RedisCache, RedisConfig};
