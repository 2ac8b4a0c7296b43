//! In-memory cache tier and durable store.
//!
//! A single mutex held across each operation stands in for the cache
//! engine's script atomicity (the in-process single-writer coordinator
//! arrangement), which makes these backends contract-equivalent to the
//! Redis/PostgreSQL pair: every invariant the proxy relies on holds
//! here too. They back the embedded mode and all of the property tests.
//!
//! TTLs are real: entries carry an expiry instant and lapse lazily on
//! access. Dirty entries never carry one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use weir_core::{
    CacheTier, DurableStore, GetReply, LoadReply, SetReply, WeirError, WeirResult,
};

// ============================================================================
// IN-MEMORY CACHE TIER
// ============================================================================

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    version: i64,
    expires_at: Option<Instant>,
}

// Scans abandoned mid-pass never resume, so their positions are
// dropped oldest-first once this many are live.
const MAX_LIVE_SCANS: usize = 64;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, MemoryEntry>,
    // Ordered so cursor scans are deterministic.
    dirty: BTreeMap<String, i64>,
    // Live scan positions, keyed by the opaque cursor handed out.
    // Key-anchored rather than index-anchored so that markers cleared
    // mid-scan never shift later batches.
    scan_cursors: HashMap<u64, String>,
    last_cursor: u64,
}

impl CacheState {
    /// Lazily drop `key` if its TTL has lapsed.
    fn purge_expired(&mut self, key: &str) {
        let lapsed = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if lapsed {
            self.entries.remove(key);
        }
    }
}

/// In-process implementation of the cache tier.
#[derive(Debug, Default)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WeirResult<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| WeirError::engine("cache lock poisoned"))
    }

    /// Current version of an entry, ignoring TTL state. Negative-cache
    /// entries report version 0.
    pub fn version_of(&self, key: &str) -> Option<i64> {
        self.state.lock().ok()?.entries.get(key).map(|e| e.version)
    }

    /// Remaining TTL of an entry, or `None` if the entry is absent or
    /// currently persists without one (i.e. is dirty).
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let state = self.state.lock().ok()?;
        let at = state.entries.get(key)?.expires_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    /// Version recorded in the dirty marker for `key`, if any.
    pub fn dirty_version(&self, key: &str) -> Option<i64> {
        self.state.lock().ok()?.dirty.get(key).copied()
    }

    /// Number of keys currently marked dirty.
    pub fn dirty_len(&self) -> usize {
        self.state.lock().map(|s| s.dirty.len()).unwrap_or(0)
    }

    /// Immediately lapse an entry's TTL, as if the clock had run out.
    /// Entries without an active TTL are left untouched. Returns whether
    /// the entry was evicted.
    pub fn force_expire(&self, key: &str) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if state.entries.get(key).is_some_and(|e| e.expires_at.is_some()) {
            state.entries.remove(key);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl CacheTier for MemoryCache {
    async fn get(&self, key: &str, ttl: Duration) -> WeirResult<GetReply> {
        let mut state = self.lock()?;
        state.purge_expired(key);

        match state.entries.get_mut(key) {
            None => Ok(GetReply::NotInCache),
            Some(entry) if entry.version == 0 => Ok(GetReply::NotExist),
            Some(entry) => {
                if entry.expires_at.is_some() {
                    entry.expires_at = Some(Instant::now() + ttl);
                }
                Ok(GetReply::Found {
                    value: entry.value.clone(),
                    version: entry.version,
                })
            }
        }
    }

    async fn set(&self, key: &str, value: &str, expected_version: i64) -> WeirResult<SetReply> {
        let mut state = self.lock()?;
        state.purge_expired(key);

        let new_version = match state.entries.get_mut(key) {
            None => return Ok(SetReply::NotInCache),
            Some(entry) => {
                if expected_version > 0 && entry.version != expected_version {
                    return Ok(SetReply::VersionMismatch);
                }
                entry.version += 1;
                entry.value = value.to_string();
                entry.expires_at = None;
                entry.version
            }
        };
        state.dirty.insert(key.to_string(), new_version);
        Ok(SetReply::Written {
            version: new_version,
        })
    }

    async fn load_get(
        &self,
        key: &str,
        version: i64,
        value: &str,
        ttl: Duration,
    ) -> WeirResult<LoadReply> {
        let mut state = self.lock()?;
        state.purge_expired(key);

        if let Some(entry) = state.entries.get_mut(key) {
            if entry.expires_at.is_some() {
                entry.expires_at = Some(Instant::now() + ttl);
            }
            if entry.version > 0 {
                return Ok(LoadReply::Found {
                    value: entry.value.clone(),
                    version: entry.version,
                });
            }
            return Ok(LoadReply::NotExist);
        }

        if version > 0 {
            state.entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    version,
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(LoadReply::Found {
                value: value.to_string(),
                version,
            })
        } else {
            state.entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: String::new(),
                    version: 0,
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(LoadReply::NotExist)
        }
    }

    async fn load_set(
        &self,
        key: &str,
        version: i64,
        value: &str,
        ttl: Duration,
    ) -> WeirResult<()> {
        let mut state = self.lock()?;
        state.purge_expired(key);

        let stale = state
            .entries
            .get(key)
            .is_none_or(|entry| entry.version < version);
        if stale {
            state.entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    version,
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        }
        Ok(())
    }

    async fn clear_dirty(
        &self,
        key: &str,
        expected_version: i64,
        ttl: Duration,
    ) -> WeirResult<()> {
        let mut state = self.lock()?;

        if state.dirty.get(key) == Some(&expected_version) {
            state.dirty.remove(key);
            if let Some(entry) = state.entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(())
    }

    async fn scan_dirty(
        &self,
        cursor: u64,
        batch: usize,
    ) -> WeirResult<(Vec<(String, i64)>, u64)> {
        use std::ops::Bound;

        let mut state = self.lock()?;
        let batch = batch.max(1);

        let after = if cursor == 0 {
            None
        } else {
            match state.scan_cursors.remove(&cursor) {
                Some(key) => Some(key),
                // Stale or unknown cursor: the scan it belonged to is
                // over as far as we can tell.
                None => return Ok((Vec::new(), 0)),
            }
        };

        let entries: Vec<(String, i64)> = match &after {
            None => state
                .dirty
                .iter()
                .take(batch)
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            Some(last) => state
                .dirty
                .range::<String, _>((Bound::Excluded(last.clone()), Bound::Unbounded))
                .take(batch)
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        };

        let next = match entries.last() {
            Some((last, _)) if entries.len() == batch => {
                let has_more = state
                    .dirty
                    .range::<String, _>((Bound::Excluded(last.clone()), Bound::Unbounded))
                    .next()
                    .is_some();
                if has_more {
                    if state.scan_cursors.len() >= MAX_LIVE_SCANS {
                        if let Some(oldest) = state.scan_cursors.keys().min().copied() {
                            state.scan_cursors.remove(&oldest);
                        }
                    }
                    state.last_cursor += 1;
                    let token = state.last_cursor;
                    state.scan_cursors.insert(token, last.clone());
                    token
                } else {
                    0
                }
            }
            _ => 0,
        };

        Ok((entries, next))
    }

    async fn read_entry(&self, key: &str) -> WeirResult<Option<(String, i64)>> {
        let mut state = self.lock()?;
        state.purge_expired(key);
        Ok(state
            .entries
            .get(key)
            .map(|e| (e.value.clone(), e.version)))
    }
}

// ============================================================================
// IN-MEMORY DURABLE STORE
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    rows: HashMap<String, (String, i64)>,
    queries: u64,
}

/// In-process implementation of the durable store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> WeirResult<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| WeirError::store("store lock poisoned"))
    }

    /// Current `(value, version)` row for `key`, if any.
    pub fn row(&self, key: &str) -> Option<(String, i64)> {
        self.state.lock().ok()?.rows.get(key).cloned()
    }

    /// Number of `query_row` calls served so far. Lets tests prove that
    /// negative caching actually short-circuits store round trips.
    pub fn query_count(&self) -> u64 {
        self.state.lock().map(|s| s.queries).unwrap_or(0)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn query_row(&self, key: &str) -> WeirResult<Option<(String, i64)>> {
        let mut state = self.lock()?;
        state.queries += 1;
        Ok(state.rows.get(key).cloned())
    }

    async fn insert_or_increment(&self, key: &str, value: &str) -> WeirResult<i64> {
        let mut state = self.lock()?;
        let row = state
            .rows
            .entry(key.to_string())
            .and_modify(|(v, version)| {
                *v = value.to_string();
                *version += 1;
            })
            .or_insert_with(|| (value.to_string(), 1));
        Ok(row.1)
    }

    async fn update_if_version_matches(
        &self,
        key: &str,
        value: &str,
        expected_version: i64,
    ) -> WeirResult<i64> {
        let mut state = self.lock()?;
        match state.rows.get_mut(key) {
            Some((v, version)) if *version == expected_version => {
                *v = value.to_string();
                *version += 1;
                Ok(*version)
            }
            _ => Err(WeirError::VersionMismatch),
        }
    }

    async fn writeback(&self, key: &str, value: &str, version: i64) -> WeirResult<()> {
        let mut state = self.lock()?;
        let apply = state
            .rows
            .get(key)
            .is_none_or(|(_, stored)| *stored < version);
        if apply {
            state
                .rows
                .insert(key.to_string(), (value.to_string(), version));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_requires_an_existing_record() {
        let cache = MemoryCache::new();
        assert_eq!(cache.set("k", "v", 0).await.unwrap(), SetReply::NotInCache);
    }

    #[tokio::test]
    async fn test_load_get_initializes_once_then_reads() {
        let cache = MemoryCache::new();

        let first = cache.load_get("k", 4, "loaded", TTL).await.unwrap();
        assert_eq!(
            first,
            LoadReply::Found {
                value: "loaded".to_string(),
                version: 4
            }
        );

        // A second populate with different data loses the race: the
        // existing record wins.
        let second = cache.load_get("k", 9, "other", TTL).await.unwrap();
        assert_eq!(
            second,
            LoadReply::Found {
                value: "loaded".to_string(),
                version: 4
            }
        );
    }

    #[tokio::test]
    async fn test_load_get_caches_confirmed_absence() {
        let cache = MemoryCache::new();
        assert_eq!(
            cache.load_get("gone", 0, "", TTL).await.unwrap(),
            LoadReply::NotExist
        );
        // Sentinel is a real record with version 0 and an active TTL.
        assert_eq!(cache.version_of("gone"), Some(0));
        assert!(cache.ttl_of("gone").is_some());
        assert_eq!(cache.get("gone", TTL).await.unwrap(), GetReply::NotExist);
    }

    #[tokio::test]
    async fn test_load_set_keeps_fresher_data() {
        let cache = MemoryCache::new();
        cache.load_set("k", 5, "newer", TTL).await.unwrap();
        cache.load_set("k", 3, "older", TTL).await.unwrap();

        assert_eq!(
            cache.get("k", TTL).await.unwrap(),
            GetReply::Found {
                value: "newer".to_string(),
                version: 5
            }
        );
    }

    #[tokio::test]
    async fn test_set_clears_ttl_and_marks_dirty() {
        let cache = MemoryCache::new();
        cache.load_set("k", 1, "v1", TTL).await.unwrap();
        assert!(cache.ttl_of("k").is_some());

        let reply = cache.set("k", "v2", 0).await.unwrap();
        assert_eq!(reply, SetReply::Written { version: 2 });
        assert!(cache.ttl_of("k").is_none());
        assert_eq!(cache.dirty_version("k"), Some(2));
    }

    #[tokio::test]
    async fn test_clear_dirty_is_versioned() {
        let cache = MemoryCache::new();
        cache.load_set("k", 1, "v1", TTL).await.unwrap();
        cache.set("k", "v2", 0).await.unwrap();

        // Stale clear is a no-op.
        cache.clear_dirty("k", 1, TTL).await.unwrap();
        assert_eq!(cache.dirty_version("k"), Some(2));

        cache.clear_dirty("k", 2, TTL).await.unwrap();
        assert_eq!(cache.dirty_version("k"), None);
        assert!(cache.ttl_of("k").is_some());
    }

    #[tokio::test]
    async fn test_scan_dirty_pages_through_everything() {
        let cache = MemoryCache::new();
        for i in 0..7 {
            let key = format!("k{i}");
            cache.load_set(&key, 1, "v", TTL).await.unwrap();
            cache.set(&key, "v2", 0).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let (batch, next) = cache.scan_dirty(cursor, 3).await.unwrap();
            seen.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn test_scan_dirty_survives_clears_between_batches() {
        let cache = MemoryCache::new();
        for i in 0..6 {
            let key = format!("k{i}");
            cache.load_set(&key, 1, "v", TTL).await.unwrap();
            cache.set(&key, "v2", 0).await.unwrap();
        }

        let (first, cursor) = cache.scan_dirty(0, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        for (key, version) in &first {
            cache.clear_dirty(key, *version, TTL).await.unwrap();
        }

        // Keys dirty for the whole scan are still all returned even
        // though the first batch's markers are gone.
        let mut seen: Vec<String> = first.into_iter().map(|(k, _)| k).collect();
        let mut cursor = cursor;
        while cursor != 0 {
            let (batch, next) = cache.scan_dirty(cursor, 2).await.unwrap();
            seen.extend(batch.into_iter().map(|(k, _)| k));
            cursor = next;
        }
        seen.sort();
        assert_eq!(seen, ["k0", "k1", "k2", "k3", "k4", "k5"]);
    }

    #[tokio::test]
    async fn test_abandoned_scan_positions_are_capped() {
        let cache = MemoryCache::new();
        for i in 0..4 {
            let key = format!("k{i}");
            cache.load_set(&key, 1, "v", TTL).await.unwrap();
            cache.set(&key, "v2", 0).await.unwrap();
        }

        // Start a scan and abandon it, then abandon many more.
        let (_, first) = cache.scan_dirty(0, 2).await.unwrap();
        assert_ne!(first, 0);
        let mut latest = 0;
        for _ in 0..MAX_LIVE_SCANS {
            let (_, cursor) = cache.scan_dirty(0, 2).await.unwrap();
            assert_ne!(cursor, 0);
            latest = cursor;
        }

        // The oldest abandoned position was dropped, so resuming it
        // just ends the scan; a recent one still pages on.
        assert_eq!(cache.scan_dirty(first, 2).await.unwrap(), (Vec::new(), 0));
        let (batch, next) = cache.scan_dirty(latest, 2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn test_store_insert_or_increment() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_or_increment("k", "a").await.unwrap(), 1);
        assert_eq!(store.insert_or_increment("k", "b").await.unwrap(), 2);
        assert_eq!(store.row("k"), Some(("b".to_string(), 2)));
    }

    #[tokio::test]
    async fn test_store_conditional_update() {
        let store = MemoryStore::new();
        store.insert_or_increment("k", "a").await.unwrap();

        assert_eq!(
            store.update_if_version_matches("k", "b", 1).await.unwrap(),
            2
        );
        assert_eq!(
            store.update_if_version_matches("k", "c", 1).await,
            Err(WeirError::VersionMismatch)
        );
        assert_eq!(
            store.update_if_version_matches("missing", "c", 1).await,
            Err(WeirError::VersionMismatch)
        );
    }

    #[tokio::test]
    async fn test_store_writeback_never_regresses() {
        let store = MemoryStore::new();
        store.writeback("k", "v5", 5).await.unwrap();
        store.writeback("k", "v3", 3).await.unwrap();
        assert_eq!(store.row("k"), Some(("v5".to_string(), 5)));

        // Replay of the applied version is a no-op, not an error.
        store.writeback("k", "v5", 5).await.unwrap();
        assert_eq!(store.row("k"), Some(("v5".to_string(), 5)));
    }
}
