//! Per-client sliding-window request counter.
//!
//! Every identity owns an ordered list of the timestamps it was admitted at.
//! A check purges the timestamps that fell out of the trailing window and
//! admits the request only while fewer than `rate_limit` remain. Rejected
//! attempts are not recorded, so hammering a full window does not extend it.
//!
//! The windows live in a [`DashMap`]; a check holds the write lock of the
//! identity's shard for the whole purge-count-append sequence, which makes
//! it atomic for that identity without serializing unrelated clients.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    /// `retry_after` is the time left until the oldest counted request
    /// leaves the window.
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Admission timestamps of one client, oldest first.
#[derive(Debug, Default)]
struct RequestWindow {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl RequestWindow {
    /// A timestamp equal to `window_start` has already expired.
    fn purge(&mut self, window_start: DateTime<Utc>) {
        while self
            .timestamps
            .front()
            .is_some_and(|oldest| *oldest <= window_start)
        {
            self.timestamps.pop_front();
        }
    }

    fn check_and_record(&mut self, now: DateTime<Utc>, window: Duration, limit: u32) -> RateDecision {
        self.purge(now - window);

        let count = self.timestamps.len();
        if count >= limit as usize {
            let retry_after = self
                .timestamps
                .front()
                .map(|oldest| *oldest + window - now)
                .unwrap_or(window)
                .max(Duration::zero());
            return RateDecision::Limited { retry_after };
        }

        // Concurrent callers may arrive with slightly older clock readings.
        let position = self.timestamps.partition_point(|timestamp| *timestamp <= now);
        self.timestamps.insert(position, now);

        RateDecision::Allowed {
            remaining: limit - (count as u32 + 1),
        }
    }

    fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    settings: Arc<SettingsStore>,
    windows: DashMap<String, RequestWindow>,
}

impl RateLimiter {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            windows: DashMap::new(),
        }
    }

    /// Counts the request against `identity` if the window has room.
    ///
    /// The limit and window length are read from the settings on every call.
    pub fn check_and_record(&self, identity: &str, now: DateTime<Utc>) -> RateDecision {
        let settings = self.settings.get();
        let window = settings.window();
        let limit = settings.rate_limit;

        let decision = match self.windows.entry(identity.to_string()) {
            Entry::Occupied(mut occupied) => {
                let decision = occupied.get_mut().check_and_record(now, window, limit);
                if occupied.get().is_empty() {
                    occupied.remove();
                }
                decision
            }
            Entry::Vacant(vacant) => {
                let mut request_window = RequestWindow::default();
                let decision = request_window.check_and_record(now, window, limit);
                if !request_window.is_empty() {
                    vacant.insert(request_window);
                }
                decision
            }
        };

        if let RateDecision::Limited { retry_after } = decision {
            debug!(
                "Rate limit reached for {identity:?} (limit={limit}, retry in {}s)",
                retry_after.num_seconds()
            );
        }

        decision
    }

    /// Drops every identity whose window no longer holds a timestamp.
    /// Returns the number of evicted identities.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let window_start = now - self.settings.get().window();
        let before = self.windows.len();

        self.windows.retain(|_, request_window| {
            request_window.purge(window_start);
            !request_window.is_empty()
        });

        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!("Evicted {evicted} idle rate-limit window(s)");
        }
        evicted
    }

    pub fn active_identities(&self) -> usize {
        self.windows.len()
    }

    pub fn reset(&self) {
        self.windows.clear();
    }
}
