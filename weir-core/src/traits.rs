//! Tier traits implemented by the cache engine and the durable store.
//!
//! The proxy is generic over these two seams. The production
//! implementations are Redis (weir-redis) and PostgreSQL (weir-pg); the
//! in-memory implementations in weir-proxy back the embedded mode and
//! the property tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::WeirResult;
use crate::reply::{GetReply, LoadReply, SetReply};

/// The cache tier: hash-structured records with per-key TTL and five
/// atomic operations.
///
/// # Atomicity
///
/// Every operation here executes as one indivisible unit relative to
/// other operations touching the same keys. This guarantee is the sole
/// hot-path synchronization primitive of the whole system: there is no
/// proxy-held lock. Redis provides it through server-side scripts; an
/// in-process implementation may hold a mutex across each operation.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Atomic read. Refreshes the TTL if one is currently active
    /// (a dirty, TTL-less entry is left untouched).
    async fn get(&self, key: &str, ttl: Duration) -> WeirResult<GetReply>;

    /// Atomic CAS write. `expected_version == 0` makes the write
    /// unconditional. On success the version increments by exactly one,
    /// the TTL is cleared (the entry persists until flushed) and the key
    /// is marked dirty with the new version, all in the same unit.
    async fn set(&self, key: &str, value: &str, expected_version: i64) -> WeirResult<SetReply>;

    /// Atomic initialize-or-read, race-safe against concurrent
    /// populators. An existing record wins; an absent one is initialized
    /// from `(version, value)` with the TTL applied, where `version == 0`
    /// initializes the negative-cache sentinel instead.
    async fn load_get(
        &self,
        key: &str,
        version: i64,
        value: &str,
        ttl: Duration,
    ) -> WeirResult<LoadReply>;

    /// Fire-and-forget cache warm. Overwrites only if the record is
    /// absent or strictly older than `version`; fresher data is kept.
    async fn load_set(
        &self,
        key: &str,
        version: i64,
        value: &str,
        ttl: Duration,
    ) -> WeirResult<()>;

    /// Remove the dirty marker for `key`, but only if it still holds
    /// `expected_version`; a superseding write leaves it intact for the
    /// next sync pass. On a successful clear the entry's TTL starts.
    async fn clear_dirty(&self, key: &str, expected_version: i64, ttl: Duration)
        -> WeirResult<()>;

    /// Cursor-based scan over the dirty set. Returns up to roughly
    /// `batch` `(key, marked_version)` pairs and the next cursor;
    /// cursor 0 means the scan has wrapped around.
    async fn scan_dirty(&self, cursor: u64, batch: usize)
        -> WeirResult<(Vec<(String, i64)>, u64)>;

    /// Plain read of an entry's current `(value, version)` fields,
    /// bypassing TTL refresh. The synchronizer uses this instead of the
    /// dirty marker's snapshot, which may be stale relative to a newer
    /// write.
    async fn read_entry(&self, key: &str) -> WeirResult<Option<(String, i64)>>;
}

/// The durable store: one relational table of `(key, value, version)`
/// rows, reachable via transactions with at least READ COMMITTED
/// isolation. Versions are monotonic and are the ground truth after a
/// flush.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a row by key. "No row" is a valid outcome, not an error.
    async fn query_row(&self, key: &str) -> WeirResult<Option<(String, i64)>>;

    /// Transactional upsert: a new row starts at version 1, an existing
    /// row increments by 1. The resulting version is read back inside
    /// the same transaction before commit.
    async fn insert_or_increment(&self, key: &str, value: &str) -> WeirResult<i64>;

    /// Conditional update applied only where the stored version equals
    /// `expected_version`. Zero matched rows fail with
    /// [`WeirError::VersionMismatch`](crate::WeirError::VersionMismatch).
    async fn update_if_version_matches(
        &self,
        key: &str,
        value: &str,
        expected_version: i64,
    ) -> WeirResult<i64>;

    /// Idempotent guarded upsert used by the write-back synchronizer:
    /// applied only while the stored version is less than `version`.
    /// Never decreases a row's version, so it is safe to replay.
    async fn writeback(&self, key: &str, value: &str, version: i64) -> WeirResult<()>;
}
