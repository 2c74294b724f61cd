//! Configuration Module - Collector Tuning Parameters
//!
//! Manages all configuration parameters for gengc.
//! Sizes trade allocation-triggered pause frequency against footprint.

/// Main configuration for the generational collector
///
/// # Examples
///
/// ```rust
/// use gengc::GcConfig;
///
/// // Use default configuration
/// let config = GcConfig::default();
/// assert!(config.validate().is_ok());
///
/// // Small nursery for a constrained embedder
/// let config = GcConfig {
///     gen0_size: 64 * 1024,
///     large_object_threshold: 8 * 1024,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Initial Gen0 arena capacity in bytes
    ///
    /// Exhausting Gen0 triggers a collection. The arena only grows when a
    /// full collection could not free enough room.
    /// Default: 256KB
    pub gen0_size: usize,

    /// Maximum heap size in bytes
    ///
    /// Hard limit on the bytes in use across Gen0, Gen1, Gen2 and the large
    /// object space. Allocation fails with `OutOfMemory` past this point.
    /// Default: 256MB
    pub max_heap_size: usize,

    /// Payload size above which objects go to the large object space
    ///
    /// Large objects are swept in place, never moved.
    /// Default: 85,000 bytes
    pub large_object_threshold: usize,

    /// Gen1 bytes in use that escalate an allocation-triggered collection to Gen1
    ///
    /// Default: 1MB
    pub gen1_budget: usize,

    /// Gen2 bytes in use that escalate an allocation-triggered collection to Full
    ///
    /// Default: 16MB
    pub gen2_budget: usize,

    /// Large object bytes in use that trigger a Full collection before a
    /// large allocation
    ///
    /// Default: 16MB
    pub loh_budget: usize,

    /// Run finalizers on a dedicated background thread
    ///
    /// When disabled, `run_pending_finalizers` drains the queue on the
    /// calling thread.
    /// Default: true
    pub finalizer_thread: bool,

    /// Abort the process when tracing detects heap corruption
    ///
    /// When disabled the corruption is returned as an error from `collect`.
    /// Default: true
    pub abort_on_corruption: bool,

    /// Enable verbose GC event logging
    ///
    /// Sends cycle and phase events to the global event logger.
    /// Default: false
    pub verbose: bool,

    /// Number of GC events kept by the collector's own event log
    ///
    /// Default: 256
    pub event_history: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            gen0_size: 256 * KB,
            max_heap_size: 256 * MB,
            large_object_threshold: 85_000,

            gen1_budget: MB,
            gen2_budget: 16 * MB,
            loh_budget: 16 * MB,

            finalizer_thread: true,
            abort_on_corruption: true,

            verbose: false,
            event_history: 256,
        }
    }
}

impl GcConfig {
    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    ///
    /// ```rust
    /// use gengc::GcConfig;
    ///
    /// let config = GcConfig {
    ///     max_heap_size: 0,
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_heap_size == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "max_heap_size must be > 0".to_string(),
            ));
        }

        if self.gen0_size < MIN_GEN0_SIZE {
            return Err(ConfigError::InvalidHeapSize(format!(
                "gen0_size must be at least {} bytes",
                MIN_GEN0_SIZE
            )));
        }

        if self.gen0_size > self.max_heap_size {
            return Err(ConfigError::InvalidHeapSize(
                "gen0_size cannot exceed max_heap_size".to_string(),
            ));
        }

        if self.max_heap_size as u64 > SPACE_LIMIT {
            return Err(ConfigError::InvalidHeapSize(format!(
                "max_heap_size cannot exceed {} bytes",
                SPACE_LIMIT
            )));
        }

        if self.large_object_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                "large_object_threshold must be > 0".to_string(),
            ));
        }

        // Anything at or below the threshold must fit an empty nursery.
        if self.large_object_threshold + crate::object::HEADER_SIZE > self.gen0_size {
            return Err(ConfigError::InvalidThreshold(
                "large_object_threshold plus header must fit into gen0_size".to_string(),
            ));
        }

        if self.gen1_budget == 0 || self.gen2_budget == 0 || self.loh_budget == 0 {
            return Err(ConfigError::InvalidBudget(
                "generation budgets must be > 0".to_string(),
            ));
        }

        if self.event_history == 0 {
            return Err(ConfigError::InvalidEventHistory(
                "event_history must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - GENGC_GEN0_SIZE
    /// - GENGC_MAX_HEAP
    /// - GENGC_LOH_THRESHOLD
    /// - GENGC_FINALIZER_THREAD
    /// - GENGC_VERBOSE
    ///
    /// ```bash
    /// export GENGC_MAX_HEAP=1073741824  # 1GB
    /// export GENGC_VERBOSE=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(size) = env_usize("GENGC_GEN0_SIZE") {
            config.gen0_size = size;
        }

        if let Some(size) = env_usize("GENGC_MAX_HEAP") {
            config.max_heap_size = size;
        }

        if let Some(size) = env_usize("GENGC_LOH_THRESHOLD") {
            config.large_object_threshold = size;
        }

        if let Some(flag) = env_flag("GENGC_FINALIZER_THREAD") {
            config.finalizer_thread = flag;
        }

        if let Some(flag) = env_flag("GENGC_VERBOSE") {
            config.verbose = flag;
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid budget: {0}")]
    InvalidBudget(String),

    #[error("Invalid event history: {0}")]
    InvalidEventHistory(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

/// Smallest nursery accepted by `validate`
pub const MIN_GEN0_SIZE: usize = 4 * KB;

/// Address range reserved for each space
pub const SPACE_LIMIT: u64 = 1 << 32;

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse::<usize>().ok()
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    Some(val == "1" || val.eq_ignore_ascii_case("true"))
}
