//! Configuration for the window cache and the object database.

use crate::{PackError, Result};
use grove_storage::LooseStoreConfig;
use serde::{Deserialize, Serialize};

/// Smallest accepted window size.
pub const MIN_WINDOW_SIZE: usize = 512;

/// Configuration for the window cache.
///
/// Accepted once when the repository is opened; the cache never changes its
/// geometry afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowCacheConfig {
    /// Maximum bytes of pack data held in memory across all packs.
    pub capacity_bytes: usize,
    /// Size of one window. Must be a power of two.
    pub window_size_bytes: usize,
    /// Map windows from the file instead of copying them to the heap.
    pub use_memory_map: bool,
}

impl Default for WindowCacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 10 * 1024 * 1024, // 10 MB
            window_size_bytes: 8 * 1024,      // 8 KB
            use_memory_map: false,
        }
    }
}

impl WindowCacheConfig {
    /// Checks that the window geometry is usable.
    pub fn validate(&self) -> Result<()> {
        if !self.window_size_bytes.is_power_of_two() {
            return Err(PackError::InvalidConfig(format!(
                "window size {} is not a power of two",
                self.window_size_bytes
            )));
        }
        if self.window_size_bytes < MIN_WINDOW_SIZE {
            return Err(PackError::InvalidConfig(format!(
                "window size {} is below the minimum of {}",
                self.window_size_bytes, MIN_WINDOW_SIZE
            )));
        }
        if self.capacity_bytes < self.window_size_bytes {
            return Err(PackError::InvalidConfig(format!(
                "capacity {} cannot hold a single {} byte window",
                self.capacity_bytes, self.window_size_bytes
            )));
        }
        Ok(())
    }

    /// Returns log2 of the window size.
    pub fn window_shift(&self) -> u32 {
        self.window_size_bytes.trailing_zeros()
    }
}

/// Configuration for an object database (loose store plus packs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectDatabaseConfig {
    /// Window cache geometry, used when the database creates its own cache.
    pub window_cache: WindowCacheConfig,
    /// Loose object settings.
    pub loose: LooseStoreConfig,
    /// Longest delta chain followed before giving up.
    pub max_delta_depth: usize,
}

impl Default for ObjectDatabaseConfig {
    fn default() -> Self {
        Self {
            window_cache: WindowCacheConfig::default(),
            loose: LooseStoreConfig::default(),
            max_delta_depth: 10_000,
        }
    }
}

impl ObjectDatabaseConfig {
    /// Validates all nested settings.
    pub fn validate(&self) -> Result<()> {
        self.window_cache.validate()?;
        if self.max_delta_depth == 0 {
            return Err(PackError::InvalidConfig(
                "max delta depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
