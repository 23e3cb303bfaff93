//! Cache configuration.
//!
//! Controls the response cache filter via the `[cache]` table of `rewind.toml`.

use std::num::NonZeroUsize;

use super::store::CacheScope;
use crate::config::CacheSettings;

/// Cache options the filter runs with, taken from the `[cache]` settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Run requests through the cache filter at all.
    pub enabled: bool,
    /// Name of the backing cache requested from the cache manager.
    pub cache_name: String,
    /// Replication scope of the backing cache.
    pub scope: CacheScope,
    /// Maximum entries kept by the in-memory store.
    pub store_limit: usize,
    /// Largest downstream body the filter will buffer.
    pub max_body_bytes: usize,
    /// Subtree rules, `segment;key:value;...`.
    pub paths: Vec<String>,
    /// Pattern rules, `segment;regex;key:value;...`, in priority order.
    pub patterns: Vec<String>,
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            cache_name: settings.cache_name.clone(),
            scope: settings.scope,
            store_limit: settings.store_limit,
            max_body_bytes: settings.max_body_bytes,
            paths: settings.paths.clone(),
            patterns: settings.patterns.clone(),
        }
    }
}

impl CacheConfig {
    /// Returns the store limit as NonZeroUsize, clamping to 1 if zero.
    pub fn store_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
