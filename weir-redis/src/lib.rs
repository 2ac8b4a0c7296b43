//! WEIR Redis - Cache tier implementation over Redis
//!
//! Implements the [`CacheTier`](weir_core::CacheTier) trait with five
//! server-side Lua scripts, each an indivisible CAS or
//! initialize-on-miss primitive. Script handles are loaded once per
//! registry and evaluated by digest, with a one-shot fallback to full
//! submission when the engine has evicted a script.
//!
//! Connections come from a deadpool-redis pool; see [`RedisConfig`] for
//! construction.

pub mod cache;
pub mod registry;
pub mod scripts;

pub use cache::{RedisCache, RedisConfig};
pub use registry::{ScriptKind, ScriptRegistry};
