//! Store configuration.

/// Configuration attached to a storage lineage.
///
/// Set when a builder is created and carried through every snapshot and
/// builder derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Whether entities under the orphan source may be parked until their
    /// parent appears.
    pub orphanage_enabled: bool,
    /// Query cache settings.
    pub query_cache: QueryCacheConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            orphanage_enabled: true,
            query_cache: QueryCacheConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a config with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset that rejects unresolved parents even under the orphan source.
    #[must_use]
    pub fn without_orphanage() -> Self {
        Self {
            orphanage_enabled: false,
            ..Self::default()
        }
    }

    /// Enables or disables the orphanage.
    #[must_use]
    pub fn with_orphanage(mut self, enabled: bool) -> Self {
        self.orphanage_enabled = enabled;
        self
    }

    /// Sets the query cache configuration.
    #[must_use]
    pub fn with_query_cache(mut self, query_cache: QueryCacheConfig) -> Self {
        self.query_cache = query_cache;
        self
    }
}

/// Query cache settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryCacheConfig {
    /// When false, every `cached` call recomputes from scratch.
    pub enabled: bool,
    /// Pending changed entities per entry above which the whole query cache
    /// of the new snapshot is dropped instead of updated incrementally.
    pub incremental_threshold: usize,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            incremental_threshold: 10_000,
        }
    }
}

impl QueryCacheConfig {
    /// Sets the incremental threshold.
    #[must_use]
    pub fn with_incremental_threshold(mut self, threshold: usize) -> Self {
        self.incremental_threshold = threshold;
        self
    }

    /// Enables or disables caching.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
