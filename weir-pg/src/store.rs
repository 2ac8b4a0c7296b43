//! Durable-store adapter over deadpool-postgres.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::{IsolationLevel, NoTls};

use weir_core::{DurableStore, WeirError, WeirResult};

/// Idempotent schema bootstrap for the backing table.
pub const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS kv (\n\
    key text PRIMARY KEY,\n\
    value text NOT NULL,\n\
    version bigint NOT NULL CHECK (version >= 0)\n\
)";

const QUERY_ROW_SQL: &str = "SELECT value, version FROM kv WHERE key = $1";

const INSERT_OR_INCREMENT_SQL: &str = "INSERT INTO kv (key, value, version) \
     VALUES ($1, $2, 1) \
     ON CONFLICT (key) DO UPDATE SET value = $2, version = kv.version + 1";

const READ_BACK_SQL: &str = "SELECT version FROM kv WHERE key = $1";

const UPDATE_IF_VERSION_SQL: &str = "UPDATE kv SET value = $2, version = version + 1 \
     WHERE key = $1 AND version = $3 RETURNING version";

const WRITEBACK_SQL: &str = "INSERT INTO kv (key, value, version) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (key) DO UPDATE SET value = $2, version = $3 \
     WHERE kv.version < $3";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "weir".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
        }
    }
}

impl PgConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("WEIR_PG_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("WEIR_PG_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("WEIR_PG_NAME").unwrap_or_else(|_| "weir".to_string()),
            user: std::env::var("WEIR_PG_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("WEIR_PG_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("WEIR_PG_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> WeirResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(self.max_size));

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| WeirError::store(format!("failed to create pool: {e}")))
    }
}

// ============================================================================
// DURABLE STORE IMPLEMENTATION
// ============================================================================

/// PostgreSQL implementation of the durable store.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Create a store over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a store from configuration.
    pub fn from_config(config: &PgConfig) -> WeirResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Create the backing table if it does not exist yet.
    pub async fn migrate(&self) -> WeirResult<()> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA_SQL)
            .await
            .map_err(WeirError::store)?;
        tracing::debug!("kv schema ensured");
        Ok(())
    }

    async fn conn(&self) -> WeirResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(WeirError::store)
    }
}

#[async_trait]
impl DurableStore for PgStore {
    async fn query_row(&self, key: &str) -> WeirResult<Option<(String, i64)>> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(QUERY_ROW_SQL, &[&key])
            .await
            .map_err(WeirError::store)?;
        Ok(row.map(|r| (r.get(0), r.get(1))))
    }

    async fn insert_or_increment(&self, key: &str, value: &str) -> WeirResult<i64> {
        let mut conn = self.conn().await?;
        let tx = conn
            .build_transaction()
            .isolation_level(IsolationLevel::ReadCommitted)
            .start()
            .await
            .map_err(WeirError::store)?;

        tx.execute(INSERT_OR_INCREMENT_SQL, &[&key, &value])
            .await
            .map_err(WeirError::store)?;

        // The upsert row-locks the key, so this read-back observes the
        // committed increment even with concurrent writers on the key.
        let row = tx
            .query_one(READ_BACK_SQL, &[&key])
            .await
            .map_err(WeirError::store)?;
        let version: i64 = row.get(0);

        tx.commit().await.map_err(WeirError::store)?;
        Ok(version)
    }

    async fn update_if_version_matches(
        &self,
        key: &str,
        value: &str,
        expected_version: i64,
    ) -> WeirResult<i64> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(UPDATE_IF_VERSION_SQL, &[&key, &value, &expected_version])
            .await
            .map_err(WeirError::store)?;

        match row {
            Some(row) => Ok(row.get(0)),
            // Zero matched rows: absent key or stale expected version.
            None => Err(WeirError::VersionMismatch),
        }
    }

    async fn writeback(&self, key: &str, value: &str, version: i64) -> WeirResult<()> {
        let conn = self.conn().await?;
        conn.execute(WRITEBACK_SQL, &[&key, &value, &version])
            .await
            .map_err(WeirError::store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PgConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "weir");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_writeback_is_monotonically_guarded() {
        // The guard is what makes replay safe; losing it would let the
        // synchronizer regress a row written by a faster peer.
        assert!(WRITEBACK_SQL.contains("kv.version < $3"));
    }

    #[test]
    fn test_new_rows_start_at_version_one() {
        assert!(INSERT_OR_INCREMENT_SQL.contains("VALUES ($1, $2, 1)"));
        assert!(INSERT_OR_INCREMENT_SQL.contains("kv.version + 1"));
    }

    #[test]
    fn test_conditional_update_increments_past_expected() {
        assert!(UPDATE_IF_VERSION_SQL.contains("version = version + 1"));
        assert!(UPDATE_IF_VERSION_SQL.contains("version = $3"));
        assert!(UPDATE_IF_VERSION_SQL.contains("RETURNING version"));
    }
}
