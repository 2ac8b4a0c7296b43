//! Redis-backed cache tier.
//!
//! [`RedisCache`] drives the atomic scripts through the registry and
//! decodes the tagged wire replies into the typed reply enums. It also
//! carries the two plain commands the synchronizer needs: a cursor scan
//! over the dirty hash and a raw entry read.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, Runtime};
use redis::Value;

use weir_core::reply::{
    STATUS_NOT_EXIST, STATUS_NOT_IN_CACHE, STATUS_OK, STATUS_VERSION_MISMATCH,
};
use weir_core::{CacheTier, GetReply, LoadReply, SetReply, WeirError, WeirResult, DIRTY_SET_KEY};

use crate::registry::{ScriptKind, ScriptRegistry};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Cache engine connection pool configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Maximum pool size.
    pub max_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_size: 16,
        }
    }
}

impl RedisConfig {
    /// Create a new configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("WEIR_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            max_size: std::env::var("WEIR_REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> WeirResult<Pool> {
        let mut cfg = deadpool_redis::Config::from_url(&self.url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(self.max_size));
        cfg.create_pool(Some(Runtime::Tokio1))
            .map_err(|e| WeirError::engine(format!("failed to create pool: {e}")))
    }
}

// EXPIRE with a zero argument deletes the key outright, so sub-second
// TTL overrides round up to one second instead of truncating to 0.
fn ttl_secs(ttl: Duration) -> String {
    ttl.as_secs().max(1).to_string()
}

// ============================================================================
// CACHE TIER IMPLEMENTATION
// ============================================================================

/// Redis implementation of the cache tier.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
    registry: std::sync::Arc<ScriptRegistry>,
}

impl RedisCache {
    /// Create a cache tier over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            registry: std::sync::Arc::new(ScriptRegistry::new()),
        }
    }

    /// Create a cache tier from configuration.
    pub fn from_config(config: &RedisConfig) -> WeirResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    async fn conn(&self) -> WeirResult<Connection> {
        self.pool.get().await.map_err(WeirError::engine)
    }
}

#[async_trait]
impl CacheTier for RedisCache {
    async fn get(&self, key: &str, ttl: Duration) -> WeirResult<GetReply> {
        let mut conn = self.conn().await?;
        let reply = self
            .registry
            .eval(
                &mut conn,
                ScriptKind::Get,
                &[key],
                &[&ttl_secs(ttl)],
            )
            .await?;
        decode_get(reply)
    }

    async fn set(&self, key: &str, value: &str, expected_version: i64) -> WeirResult<SetReply> {
        let mut conn = self.conn().await?;
        let reply = self
            .registry
            .eval(
                &mut conn,
                ScriptKind::Set,
                &[key, DIRTY_SET_KEY],
                &[value, &expected_version.to_string()],
            )
            .await?;
        decode_set(reply)
    }

    async fn load_get(
        &self,
        key: &str,
        version: i64,
        value: &str,
        ttl: Duration,
    ) -> WeirResult<LoadReply> {
        let mut conn = self.conn().await?;
        let reply = self
            .registry
            .eval(
                &mut conn,
                ScriptKind::LoadGet,
                &[key],
                &[&version.to_string(), value, &ttl_secs(ttl)],
            )
            .await?;
        decode_load(reply)
    }

    async fn load_set(
        &self,
        key: &str,
        version: i64,
        value: &str,
        ttl: Duration,
    ) -> WeirResult<()> {
        let mut conn = self.conn().await?;
        self.registry
            .eval(
                &mut conn,
                ScriptKind::LoadSet,
                &[key],
                &[&version.to_string(), value, &ttl_secs(ttl)],
            )
            .await?;
        Ok(())
    }

    async fn clear_dirty(
        &self,
        key: &str,
        expected_version: i64,
        ttl: Duration,
    ) -> WeirResult<()> {
        let mut conn = self.conn().await?;
        self.registry
            .eval(
                &mut conn,
                ScriptKind::ClearDirty,
                &[DIRTY_SET_KEY, key],
                &[&expected_version.to_string(), &ttl_secs(ttl)],
            )
            .await?;
        Ok(())
    }

    async fn scan_dirty(
        &self,
        cursor: u64,
        batch: usize,
    ) -> WeirResult<(Vec<(String, i64)>, u64)> {
        let mut conn = self.conn().await?;
        let (next, fields): (u64, Vec<String>) = redis::cmd("HSCAN")
            .arg(DIRTY_SET_KEY)
            .arg(cursor)
            .arg("COUNT")
            .arg(batch)
            .query_async(&mut conn)
            .await
            .map_err(WeirError::engine)?;

        let mut entries = Vec::with_capacity(fields.len() / 2);
        for pair in fields.chunks_exact(2) {
            let version = pair[1]
                .parse::<i64>()
                .map_err(|_| WeirError::protocol(format!("non-numeric dirty marker: {}", pair[1])))?;
            entries.push((pair[0].clone(), version));
        }
        Ok((entries, next))
    }

    async fn read_entry(&self, key: &str) -> WeirResult<Option<(String, i64)>> {
        let mut conn = self.conn().await?;
        let (version, value): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(key)
            .arg("version")
            .arg("value")
            .query_async(&mut conn)
            .await
            .map_err(WeirError::engine)?;

        match (version, value) {
            (Some(version), Some(value)) => {
                let version = version
                    .parse::<i64>()
                    .map_err(|_| WeirError::protocol(format!("non-numeric version: {version}")))?;
                Ok(Some((value, version)))
            }
            _ => Ok(None),
        }
    }
}

// ============================================================================
// REPLY DECODING
// ============================================================================

fn reply_parts(value: Value) -> WeirResult<Vec<Value>> {
    match value {
        Value::Array(items) if !items.is_empty() => Ok(items),
        other => Err(WeirError::protocol(format!(
            "expected status array, got {other:?}"
        ))),
    }
}

fn as_text(value: &Value) -> WeirResult<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone())
            .map_err(|_| WeirError::protocol("non-utf8 field")),
        Value::SimpleString(s) => Ok(s.clone()),
        other => Err(WeirError::protocol(format!(
            "expected string field, got {other:?}"
        ))),
    }
}

fn as_int(value: &Value) -> WeirResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::BulkString(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| WeirError::protocol("non-numeric field")),
        other => Err(WeirError::protocol(format!(
            "expected integer field, got {other:?}"
        ))),
    }
}

fn decode_get(value: Value) -> WeirResult<GetReply> {
    let parts = reply_parts(value)?;
    let status = as_text(&parts[0])?;
    match status.as_str() {
        STATUS_OK if parts.len() >= 3 => Ok(GetReply::Found {
            value: as_text(&parts[1])?,
            version: as_int(&parts[2])?,
        }),
        STATUS_NOT_IN_CACHE => Ok(GetReply::NotInCache),
        STATUS_NOT_EXIST => Ok(GetReply::NotExist),
        other => Err(WeirError::protocol(format!("unexpected get status: {other}"))),
    }
}

fn decode_set(value: Value) -> WeirResult<SetReply> {
    let parts = reply_parts(value)?;
    let status = as_text(&parts[0])?;
    match status.as_str() {
        STATUS_OK if parts.len() >= 2 => Ok(SetReply::Written {
            version: as_int(&parts[1])?,
        }),
        STATUS_NOT_IN_CACHE => Ok(SetReply::NotInCache),
        STATUS_VERSION_MISMATCH => Ok(SetReply::VersionMismatch),
        other => Err(WeirError::protocol(format!("unexpected set status: {other}"))),
    }
}

fn decode_load(value: Value) -> WeirResult<LoadReply> {
    let parts = reply_parts(value)?;
    let status = as_text(&parts[0])?;
    match status.as_str() {
        STATUS_OK if parts.len() >= 3 => Ok(LoadReply::Found {
            value: as_text(&parts[1])?,
            version: as_int(&parts[2])?,
        }),
        STATUS_NOT_EXIST => Ok(LoadReply::NotExist),
        other => Err(WeirError::protocol(format!(
            "unexpected load status: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_decode_get_found() {
        let reply = Value::Array(vec![bulk("err_ok"), bulk("world"), Value::Int(3)]);
        assert_eq!(
            decode_get(reply).unwrap(),
            GetReply::Found {
                value: "world".to_string(),
                version: 3
            }
        );
    }

    #[test]
    fn test_decode_get_miss_and_negative() {
        let miss = Value::Array(vec![bulk("err_not_in_redis")]);
        assert_eq!(decode_get(miss).unwrap(), GetReply::NotInCache);

        let negative = Value::Array(vec![bulk("err_not_exist")]);
        assert_eq!(decode_get(negative).unwrap(), GetReply::NotExist);
    }

    #[test]
    fn test_decode_set_written_and_mismatch() {
        let written = Value::Array(vec![bulk("err_ok"), Value::Int(7)]);
        assert_eq!(decode_set(written).unwrap(), SetReply::Written { version: 7 });

        let mismatch = Value::Array(vec![bulk("err_version_not_match")]);
        assert_eq!(decode_set(mismatch).unwrap(), SetReply::VersionMismatch);
    }

    #[test]
    fn test_decode_load_initialized() {
        // Lua may echo the loaded version back as a string argument.
        let reply = Value::Array(vec![bulk("err_ok"), bulk("warm"), bulk("5")]);
        assert_eq!(
            decode_load(reply).unwrap(),
            LoadReply::Found {
                value: "warm".to_string(),
                version: 5
            }
        );
    }

    #[test]
    fn test_decode_rejects_malformed_replies() {
        assert!(matches!(
            decode_get(Value::Nil),
            Err(WeirError::Protocol(_))
        ));
        assert!(matches!(
            decode_set(Value::Array(vec![bulk("err_unknown")])),
            Err(WeirError::Protocol(_))
        ));
        // Truncated success reply is a protocol error, not a silent hit.
        assert!(matches!(
            decode_get(Value::Array(vec![bulk("err_ok")])),
            Err(WeirError::Protocol(_))
        ));
    }

    #[test]
    fn test_subsecond_ttl_rounds_up_to_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(250)), "1");
        assert_eq!(ttl_secs(Duration::from_secs(30)), "30");
    }

    #[test]
    fn test_config_defaults() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.max_size, 16);
    }
}
