//! Proxy configuration.

use std::time::Duration;

/// Configuration for the data proxy and its write-back synchronizer.
///
/// All values are fixed for the process lifetime; there is no dynamic
/// reconfiguration. Per-call TTL overrides on the proxy operations take
/// precedence over `default_ttl`.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// TTL applied to cached entries once flushed or loaded for
    /// read-only caching. Dirty entries carry no TTL at all.
    pub default_ttl: Duration,
    /// Dirty-set field-pairs requested per scan round.
    pub scan_batch: usize,
    /// Per-key deadline for a write-back flush. Expiry aborts the whole
    /// sync pass.
    pub flush_deadline: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(1800),
            scan_batch: 100,
            flush_deadline: Duration::from_secs(1),
        }
    }
}

impl ProxyConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default cache TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the dirty-scan batch size.
    pub fn with_scan_batch(mut self, batch: usize) -> Self {
        self.scan_batch = batch;
        self
    }

    /// Set the per-key flush deadline.
    pub fn with_flush_deadline(mut self, deadline: Duration) -> Self {
        self.flush_deadline = deadline;
        self
    }

    /// Create a config from environment variables, falling back to the
    /// defaults for anything unset.
    ///
    /// - `WEIR_CACHE_TTL_SECS`: default cache TTL in seconds
    /// - `WEIR_SCAN_BATCH`: dirty-scan batch size
    /// - `WEIR_FLUSH_DEADLINE_MS`: per-key flush deadline in milliseconds
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: std::env::var("WEIR_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            scan_batch: std::env::var("WEIR_SCAN_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.scan_batch),
            flush_deadline: std::env::var("WEIR_FLUSH_DEADLINE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(1800));
        assert_eq!(config.scan_batch, 100);
        assert_eq!(config.flush_deadline, Duration::from_secs(1));
    }

    #[test]
    fn test_config_builder() {
        let config = ProxyConfig::new()
            .with_default_ttl(Duration::from_secs(60))
            .with_scan_batch(25)
            .with_flush_deadline(Duration::from_millis(250));

        assert_eq!(config.default_ttl, Duration::from_secs(60));
        assert_eq!(config.scan_batch, 25);
        assert_eq!(config.flush_deadline, Duration::from_millis(250));
    }
}
