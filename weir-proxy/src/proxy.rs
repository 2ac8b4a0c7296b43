//! The data proxy and its write-back synchronizer.
//!
//! Composes the cache tier and the durable store into a single
//! read/write API. The cache-side atomic operations resolve all
//! cross-writer races; the proxy itself holds no lock and performs no
//! retries beyond the script registry's one-shot eviction recovery.

use std::sync::Arc;
use std::time::Duration;

use weir_core::{
    CacheTier, DurableStore, GetReply, LoadReply, SetReply, WeirError, WeirResult,
    NEGATIVE_VERSION,
};

use crate::config::ProxyConfig;

/// Versioned cache-aside / write-back proxy.
///
/// # Type Parameters
///
/// - `C`: the cache tier (Redis in production, in-memory embedded)
/// - `S`: the durable store (PostgreSQL in production)
///
/// # Consistency
///
/// Last-writer-wins by version, with at-least-once write-back. Reads
/// are not linearizable across the two tiers; within the cache tier
/// every mutation is an atomic CAS.
pub struct DataProxy<C, S>
where
    C: CacheTier,
    S: DurableStore,
{
    /// The cache tier.
    cache: Arc<C>,
    /// The durable store.
    store: Arc<S>,
    /// Proxy configuration.
    config: ProxyConfig,
}

impl<C, S> DataProxy<C, S>
where
    C: CacheTier,
    S: DurableStore,
{
    /// Create a new proxy.
    pub fn new(cache: Arc<C>, store: Arc<S>, config: ProxyConfig) -> Self {
        Self {
            cache,
            store,
            config,
        }
    }

    /// Create a new proxy with default configuration.
    pub fn with_defaults(cache: Arc<C>, store: Arc<S>) -> Self {
        Self::new(cache, store, ProxyConfig::default())
    }

    /// Get the proxy configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Get a reference to the cache tier.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Get a reference to the durable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or(self.config.default_ttl)
    }

    /// Read a key, falling back to the durable store on a genuine miss
    /// and repopulating the cache with whatever the store answered -
    /// including a confirmed absence, which becomes a negative-cache
    /// entry so repeat lookups stop hitting the store.
    ///
    /// Returns [`WeirError::NotExist`] when the key is confirmed absent.
    pub async fn get(&self, key: &str, ttl: Option<Duration>) -> WeirResult<(String, i64)> {
        let ttl = self.ttl(ttl);

        match self.cache.get(key, ttl).await? {
            GetReply::Found { value, version } => Ok((value, version)),
            GetReply::NotExist => Err(WeirError::NotExist),
            GetReply::NotInCache => {
                let loaded = self.store.query_row(key).await?;
                tracing::debug!(key, found = loaded.is_some(), "cache miss, queried store");

                // Absence loads as the version-0 sentinel. LoadGet is
                // race-safe: a concurrent populator's record wins.
                let (value, version) = match &loaded {
                    Some((value, version)) => (value.as_str(), *version),
                    None => ("", NEGATIVE_VERSION),
                };
                match self.cache.load_get(key, version, value, ttl).await? {
                    LoadReply::Found { value, version } => Ok((value, version)),
                    LoadReply::NotExist => Err(WeirError::NotExist),
                }
            }
        }
    }

    /// Unconditional write. Returns the new version.
    ///
    /// The cache path increments the version and marks the key dirty
    /// for asynchronous write-back. When the key is not cached at all,
    /// the write goes to the durable store directly (insert at version
    /// 1 or increment), the cache is warmed fire-and-forget, and no
    /// dirty marker is set - the store is already authoritative.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> WeirResult<i64> {
        let ttl = self.ttl(ttl);

        match self.cache.set(key, value, 0).await? {
            SetReply::Written { version } => Ok(version),
            SetReply::VersionMismatch => Err(WeirError::VersionMismatch),
            SetReply::NotInCache => {
                let version = self.store.insert_or_increment(key, value).await?;
                self.warm(key, version, value, ttl).await;
                Ok(version)
            }
        }
    }

    /// Conditional write: succeeds only while the current version
    /// equals `expected_version`, otherwise fails with
    /// [`WeirError::VersionMismatch`] and leaves the entry unchanged.
    /// Returns the new version.
    pub async fn set_with_version(
        &self,
        key: &str,
        value: &str,
        expected_version: i64,
        ttl: Option<Duration>,
    ) -> WeirResult<i64> {
        let ttl = self.ttl(ttl);

        match self.cache.set(key, value, expected_version).await? {
            SetReply::Written { version } => Ok(version),
            SetReply::VersionMismatch => Err(WeirError::VersionMismatch),
            SetReply::NotInCache => {
                let version = self
                    .store
                    .update_if_version_matches(key, value, expected_version)
                    .await?;
                self.warm(key, version, value, ttl).await;
                Ok(version)
            }
        }
    }

    /// Best-effort cache warm after a durable-store-mediated write. The
    /// store already holds the authoritative row, so a failure here
    /// costs a future cache miss, nothing more.
    async fn warm(&self, key: &str, version: i64, value: &str, ttl: Duration) {
        if let Err(err) = self.cache.load_set(key, version, value, ttl).await {
            tracing::warn!(key, version, %err, "failed to warm cache after store write");
        }
    }

    /// Drain the dirty set into the durable store.
    ///
    /// One pass: scans the dirty set in batches until the cursor wraps.
    /// For each dirty key the entry's current fields are re-read (the
    /// marker's snapshot may be stale relative to a just-applied newer
    /// write), flushed under the configured per-key deadline with the
    /// monotonic writeback guard, and the marker is cleared only if it
    /// still holds the flushed version.
    ///
    /// Any store error or deadline expiry aborts the pass. Keys already
    /// flushed stay persisted (writeback is idempotent) whether or not
    /// their markers cleared; the next pass reconciles the rest. A
    /// [`WeirError::DeadlineExceeded`] therefore means "retry later",
    /// not data loss.
    ///
    /// Safe to run concurrently with live Get/Set traffic on the same
    /// keys.
    pub async fn sync_dirty_to_db(&self) -> WeirResult<()> {
        let mut cursor = 0u64;

        loop {
            let (entries, next) = self
                .cache
                .scan_dirty(cursor, self.config.scan_batch)
                .await?;

            for (key, marked_version) in entries {
                let Some((value, version)) = self.cache.read_entry(&key).await? else {
                    // Dirty entries carry no TTL, so a vanished entry is
                    // an external deletion; leave the marker for
                    // inspection rather than fabricate a flush.
                    tracing::warn!(key = %key, marked_version, "dirty key has no cache entry");
                    continue;
                };

                match tokio::time::timeout(
                    self.config.flush_deadline,
                    self.store.writeback(&key, &value, version),
                )
                .await
                {
                    Ok(result) => result?,
                    Err(_) => return Err(WeirError::DeadlineExceeded),
                }

                // No-op if a concurrent write advanced the marker; the
                // key then stays dirty for the next pass.
                self.cache
                    .clear_dirty(&key, version, self.config.default_ttl)
                    .await?;
                tracing::debug!(key = %key, version, "flushed dirty entry");
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(())
    }
}

impl<C, S> Clone for DataProxy<C, S>
where
    C: CacheTier,
    S: DurableStore,
{
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}
