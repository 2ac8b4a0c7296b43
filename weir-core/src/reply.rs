//! Tagged replies for the atomic cache scripts.
//!
//! Each script answers with a leading status token followed by positional
//! result fields. These enums are the typed rendition of that wire shape:
//! one success variant carrying the result fields, plus the named failure
//! variants, so call sites match on meaning instead of parsing arrays.

/// Wire status token: operation succeeded, result fields follow.
pub const STATUS_OK: &str = "err_ok";
/// Wire status token: the record was never cached. The caller must fall
/// back to the durable store; this is never a valid final answer.
pub const STATUS_NOT_IN_CACHE: &str = "err_not_in_redis";
/// Wire status token: the record is a negative-cache entry. The key is
/// confirmed absent and this answer serves directly from the cache.
pub const STATUS_NOT_EXIST: &str = "err_not_exist";
/// Wire status token: the expected version did not match.
pub const STATUS_VERSION_MISMATCH: &str = "err_version_not_match";

/// Reply of the atomic Get script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetReply {
    /// Record present with a live version.
    Found { value: String, version: i64 },
    /// Record was never cached; fall back to the durable store.
    NotInCache,
    /// Negative-cache hit: the key is confirmed absent upstream.
    NotExist,
}

/// Reply of the atomic Set (CAS) script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetReply {
    /// Write applied; carries the incremented version.
    Written { version: i64 },
    /// Record was never cached; fall back to the durable store.
    NotInCache,
    /// The expected version did not match the current one.
    VersionMismatch,
}

/// Reply of the atomic LoadGet (initialize-or-read) script.
///
/// LoadGet never answers `NotInCache`: on an absent record it initializes
/// one from the loaded row (or the negative-cache sentinel) instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadReply {
    /// Record present (pre-existing or just initialized).
    Found { value: String, version: i64 },
    /// Negative-cache answer: absent upstream, sentinel now cached.
    NotExist,
}
