//! TTL configuration for the cache tiers.

use std::time::Duration;

/// TTL of plain `request` calls.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(5);
/// TTL of fetches issued through synced queries.
pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(10 * 60);
/// TTL of entries written by the login prefetch.
pub const DEFAULT_PREFETCH_TTL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the request cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL used by `request` when the caller does not pick one.
    pub request_ttl: Duration,
    /// TTL used by the query layer.
    pub query_ttl: Duration,
    /// TTL used by the login prefetch.
    pub prefetch_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            request_ttl: DEFAULT_REQUEST_TTL,
            query_ttl: DEFAULT_QUERY_TTL,
            prefetch_ttl: DEFAULT_PREFETCH_TTL,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_ttl(mut self, ttl: Duration) -> Self {
        self.request_ttl = ttl;
        self
    }

    pub fn with_query_ttl(mut self, ttl: Duration) -> Self {
        self.query_ttl = ttl;
        self
    }

    pub fn with_prefetch_ttl(mut self, ttl: Duration) -> Self {
        self.prefetch_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_request_ttl(Duration::from_secs(1))
            .with_query_ttl(Duration::from_secs(60))
            .with_prefetch_ttl(Duration::from_secs(30));

        assert_eq!(config.request_ttl, Duration::from_secs(1));
        assert_eq!(config.query_ttl, Duration::from_secs(60));
        assert_eq!(config.prefetch_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_default_tiers_are_distinct() {
        let config = CacheConfig::default();
        assert!(config.request_ttl < config.prefetch_ttl);
        assert!(config.prefetch_ttl < config.query_ttl);
    }
}
