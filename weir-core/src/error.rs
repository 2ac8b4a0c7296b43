//! Error types for weir operations.

use thiserror::Error;

/// Result type used across all weir crates.
pub type WeirResult<T> = Result<T, WeirError>;

/// Errors surfaced by the proxy, the cache tier and the durable store.
///
/// `NotInCache` is deliberately absent: it is an internal miss signal
/// carried by the reply enums and always resolved by falling back one
/// layer, never propagated to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WeirError {
    /// Key confirmed absent upstream. This is the negative-cache answer,
    /// not a transport failure.
    #[error("key does not exist")]
    NotExist,

    /// Optimistic-concurrency conflict: the expected version no longer
    /// matches the current one. The caller must re-read and recompute
    /// its intent; retrying the same write blindly is never safe.
    #[error("version mismatch: optimistic write rejected")]
    VersionMismatch,

    /// Cache engine transport or script-registry failure.
    #[error("cache engine error: {0}")]
    Engine(String),

    /// Durable-store failure during fallback or write-back.
    #[error("durable store error: {0}")]
    Store(String),

    /// A write-back flush exceeded its per-key deadline. Some keys may
    /// remain dirty; a later sync pass reconciles them. Not data loss.
    #[error("write-back flush exceeded its deadline")]
    DeadlineExceeded,

    /// The cache engine returned a reply the decoder does not recognize.
    #[error("malformed script reply: {0}")]
    Protocol(String),
}

impl WeirError {
    /// Create an engine error from any displayable source.
    pub fn engine(reason: impl std::fmt::Display) -> Self {
        Self::Engine(reason.to_string())
    }

    /// Create a store error from any displayable source.
    pub fn store(reason: impl std::fmt::Display) -> Self {
        Self::Store(reason.to_string())
    }

    /// Create a protocol error from any displayable source.
    pub fn protocol(reason: impl std::fmt::Display) -> Self {
        Self::Protocol(reason.to_string())
    }

    /// Whether this error is the negative-cache answer rather than a
    /// failure of the proxy itself.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, Self::NotExist)
    }
}
