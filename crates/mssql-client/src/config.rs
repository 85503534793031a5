//! Client configuration.

/// Default maximum number of cached statements.
pub const DEFAULT_CACHE_CAPACITY: usize = 2000;

/// Default number of entries the cache may exceed its capacity by before
/// it is trimmed.
pub const DEFAULT_TRIM_THRESHOLD: usize = 300;

/// Configuration for the parameter encryption metadata cache.
///
/// Trimming is lazy: the cache grows until it holds more than
/// `capacity + trim_threshold` entries, then the oldest entries are evicted
/// down to `capacity` in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCacheConfig {
    /// Number of entries kept after a trim (default: 2000).
    pub capacity: usize,
    /// Growth allowed past `capacity` before trimming (default: 300).
    pub trim_threshold: usize,
    /// Whether caching is enabled (default: true).
    pub enabled: bool,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            trim_threshold: DEFAULT_TRIM_THRESHOLD,
            enabled: true,
        }
    }
}

impl MetadataCacheConfig {
    /// Create a new cache configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration with caching disabled.
    ///
    /// A disabled cache reports every lookup as a miss and ignores inserts.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the number of entries kept after a trim.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set how far the cache may grow past its capacity before trimming.
    #[must_use]
    pub fn trim_threshold(mut self, threshold: usize) -> Self {
        self.trim_threshold = threshold;
        self
    }

    /// Enable or disable caching.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Entry count above which an insert trims the cache first.
    #[must_use]
    pub fn trim_trigger(&self) -> usize {
        self.capacity.saturating_add(self.trim_threshold)
    }
}
