use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Download counters shown on the admin dashboard.
#[derive(Debug, Default)]
pub struct DownloadStats {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_downloads: u64,
    pub successful_downloads: u64,
    pub failed_downloads: u64,
}

impl DownloadStats {
    pub fn record_admitted(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_downloads: self.total.load(Ordering::Relaxed),
            successful_downloads: self.successful.load(Ordering::Relaxed),
            failed_downloads: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}
