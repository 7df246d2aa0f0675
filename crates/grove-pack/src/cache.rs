//! Bounded window cache shared by every open pack.
//!
//! Pack files can be far larger than memory, so they are read through
//! fixed-size windows. The cache keeps the most recently used windows of all
//! open files under one byte budget and evicts least-recently-used windows
//! when the budget is exceeded.
//!
//! Bookkeeping (lookup, insert, touch, evict) happens under one short lock.
//! Disk reads happen outside it: a miss registers a per-key load slot, and
//! concurrent requesters for the same window wait on that slot, so at most one
//! load per `(file, window)` is in flight.

use crate::config::WindowCacheConfig;
use crate::window::{FileId, Window, WindowKey, WindowedFile};
use crate::{PackError, Result};
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Window cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of requests served from a resident window.
    pub hits: u64,
    /// Number of requests that found no resident window.
    pub misses: u64,
    /// Number of windows read from disk.
    pub loads: u64,
    /// Number of evictions.
    pub evictions: u64,
    /// Bytes currently resident.
    pub resident_bytes: usize,
    /// Windows currently resident.
    pub resident_windows: usize,
    /// Files currently registered.
    pub open_files: usize,
}

impl CacheStats {
    /// Returns the cache hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}

type LoadSlot = Arc<OnceCell<Arc<Window>>>;

struct CacheState {
    windows: LruCache<WindowKey, Arc<Window>>,
    loading: HashMap<WindowKey, LoadSlot>,
    open_files: HashSet<FileId>,
    resident_bytes: usize,
}

/// Process- or repository-wide pool of pack windows.
pub struct WindowCache {
    config: WindowCacheConfig,
    shift: u32,
    state: Mutex<CacheState>,
    metrics: CacheMetrics,
    next_file_id: AtomicU64,
}

impl WindowCache {
    /// Creates a cache with the given geometry.
    pub fn new(config: WindowCacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Creates a cache with default configuration.
    pub fn with_defaults() -> Self {
        Self::build(WindowCacheConfig::default())
    }

    fn build(config: WindowCacheConfig) -> Self {
        Self {
            shift: config.window_shift(),
            config,
            state: Mutex::new(CacheState {
                windows: LruCache::unbounded(),
                loading: HashMap::new(),
                open_files: HashSet::new(),
                resident_bytes: 0,
            }),
            metrics: CacheMetrics::default(),
            next_file_id: AtomicU64::new(1),
        }
    }

    /// Returns the cache configuration.
    pub fn config(&self) -> &WindowCacheConfig {
        &self.config
    }

    /// Size of one window in bytes.
    pub fn window_size(&self) -> usize {
        self.config.window_size_bytes
    }

    /// Opens a file and registers it with the cache.
    pub fn open_file(&self, path: &Path) -> Result<WindowedFile> {
        let id = FileId(self.next_file_id.fetch_add(1, Ordering::Relaxed));
        let file = WindowedFile::open(id, path)?;
        self.state.lock().open_files.insert(id);
        debug!(file = id.0, path = %path.display(), len = file.len(), "registered file");
        Ok(file)
    }

    /// Returns the window of `file` covering `position`, loading it on a miss.
    pub fn get(&self, file: &WindowedFile, position: u64) -> Result<Arc<Window>> {
        if position >= file.len() {
            return Err(PackError::corrupt(format!(
                "read at {} past the end of {} ({} bytes)",
                position,
                file.path().display(),
                file.len()
            )));
        }
        let key = WindowKey {
            file: file.id(),
            window: position >> self.shift,
        };

        let slot = {
            let mut state = self.state.lock();
            if let Some(window) = state.windows.get(&key) {
                self.metrics.record_hit();
                trace!(file = key.file.0, window = key.window, "window hit");
                return Ok(window.clone());
            }
            self.metrics.record_miss();
            state
                .loading
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let loaded = slot
            .get_or_try_init(|| {
                self.metrics.record_load();
                debug!(file = key.file.0, window = key.window, "loading window");
                file.load(
                    key.window,
                    self.config.window_size_bytes,
                    self.shift,
                    self.config.use_memory_map,
                )
                .map(Arc::new)
            })
            .cloned();

        let mut state = self.state.lock();
        if state
            .loading
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            state.loading.remove(&key);
        }
        let window = loaded?;
        if state.open_files.contains(&key.file) && !state.windows.contains(&key) {
            state.resident_bytes += window.len();
            state.windows.put(key, window.clone());
            self.evict(&mut state);
        }
        Ok(window)
    }

    /// Drops every window belonging to `file` and forgets the file.
    pub fn purge(&self, file: FileId) {
        let mut state = self.state.lock();
        let keys: Vec<WindowKey> = state
            .windows
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| key.file == file)
            .collect();
        for key in &keys {
            if let Some(window) = state.windows.pop(key) {
                state.resident_bytes -= window.len();
            }
        }
        state.loading.retain(|key, _| key.file != file);
        state.open_files.remove(&file);
        debug!(file = file.0, dropped = keys.len(), "purged file from window cache");
    }

    /// Returns true if the window covering `position` of `file` is resident.
    ///
    /// Does not count as a use for eviction order.
    pub fn is_resident(&self, file: FileId, position: u64) -> bool {
        let key = WindowKey {
            file,
            window: position >> self.shift,
        };
        self.state.lock().windows.contains(&key)
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            loads: self.metrics.loads.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            resident_bytes: state.resident_bytes,
            resident_windows: state.windows.len(),
            open_files: state.open_files.len(),
        }
    }

    fn evict(&self, state: &mut CacheState) {
        while state.resident_bytes > self.config.capacity_bytes {
            let Some((key, window)) = state.windows.pop_lru() else {
                break;
            };
            state.resident_bytes -= window.len();
            self.metrics.record_eviction();
            debug!(file = key.file.0, window = key.window, "evicted window");
        }
    }
}

impl std::fmt::Debug for WindowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
