//! Zlib settings and traffic counters for the loose object store.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Zlib level used when writing loose objects.
///
/// Reads accept any level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Stored blocks only
    None,
    /// Level 1
    Fast,
    /// Level 6, what git writes
    #[default]
    Default,
    /// Level 9
    Best,
}

impl CompressionLevel {
    /// Converts to flate2 compression level.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }
}

/// Running counters kept by a loose store.
#[derive(Debug, Default)]
pub(crate) struct LooseStats {
    reads: AtomicU64,
    writes: AtomicU64,
    duplicates: AtomicU64,
    content_bytes: AtomicU64,
    stored_bytes: AtomicU64,
}

impl LooseStats {
    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one deflated object, installed or discarded as a duplicate.
    pub(crate) fn record_write(&self, content: u64, stored: u64, duplicate: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        self.content_bytes.fetch_add(content, Ordering::Relaxed);
        self.stored_bytes.fetch_add(stored, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LooseStatsSnapshot {
        LooseStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            content_bytes: self.content_bytes.load(Ordering::Relaxed),
            stored_bytes: self.stored_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a loose store's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LooseStatsSnapshot {
    /// Objects inflated by `read`.
    pub reads: u64,
    /// Objects deflated by `write` or `write_stream`.
    pub writes: u64,
    /// Writes whose object was already on disk.
    pub duplicates: u64,
    /// Content bytes passed to writes.
    pub content_bytes: u64,
    /// Deflated bytes produced by writes.
    pub stored_bytes: u64,
}

impl LooseStatsSnapshot {
    /// Deflated size over content size, 1.0 before any write.
    pub fn storage_ratio(&self) -> f64 {
        if self.content_bytes == 0 {
            1.0
        } else {
            self.stored_bytes as f64 / self.content_bytes as f64
        }
    }
}
