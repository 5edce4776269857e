//! Per-session transfer counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one session generation. Only ever incremented.
#[derive(Debug, Default)]
pub struct SessionStats {
    uploaded_bytes: AtomicU64,
    downloaded_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

impl SessionStats {
    pub fn record_upload(&self, bytes: u64) {
        self.uploaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_download(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters. Each counter is read independently.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uploaded_bytes: self.uploaded_bytes.load(Ordering::Relaxed),
            downloaded_bytes: self.downloaded_bytes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
