//! Process-wide settings consumed by the admission gates and the download routes.

use std::{collections::BTreeSet, sync::Arc};

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_RATE_LIMIT: u32 = 10;
pub const DEFAULT_WINDOW_SECONDS: u64 = 60 * 60;
pub const MAX_WINDOW_SECONDS: u64 = 31 * 24 * 60 * 60;
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 500;
pub const DEFAULT_QUALITIES: [&str; 4] = ["360p", "480p", "720p", "1080p"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Requests admitted per client inside one window.
    pub rate_limit: u32,
    pub window_seconds: u64,
    pub maintenance: bool,
    /// Largest artifact handed to a client, in megabytes.
    #[serde(rename = "maxFileSize")]
    pub max_file_size_mb: u64,
    pub allowed_qualities: BTreeSet<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            maintenance: false,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            allowed_qualities: DEFAULT_QUALITIES.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Settings {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds.min(MAX_WINDOW_SECONDS) as i64)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1_048_576)
    }

    pub fn allows_quality(&self, quality: &str) -> bool {
        self.allowed_qualities.contains(quality)
    }

    pub(crate) fn validate(&self) -> Result<(), SettingsError> {
        if self.window_seconds == 0 {
            return Err(SettingsError::ZeroWindow);
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(SettingsError::WindowTooLong(self.window_seconds));
        }
        if self.max_file_size_mb == 0 {
            return Err(SettingsError::ZeroMaxFileSize);
        }
        if self.allowed_qualities.is_empty() {
            return Err(SettingsError::NoQualities);
        }
        if let Some(label) = self
            .allowed_qualities
            .iter()
            .find(|label| label.trim().is_empty() || label.trim() != label.as_str())
        {
            return Err(SettingsError::InvalidQuality(label.clone()));
        }
        Ok(())
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub rate_limit: Option<u32>,
    pub window_seconds: Option<u64>,
    pub maintenance: Option<bool>,
    #[serde(rename = "maxFileSize")]
    pub max_file_size_mb: Option<u64>,
    pub allowed_qualities: Option<BTreeSet<String>>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply_to(self, settings: &mut Settings) {
        if let Some(rate_limit) = self.rate_limit {
            settings.rate_limit = rate_limit;
        }
        if let Some(window_seconds) = self.window_seconds {
            settings.window_seconds = window_seconds;
        }
        if let Some(maintenance) = self.maintenance {
            settings.maintenance = maintenance;
        }
        if let Some(max_file_size_mb) = self.max_file_size_mb {
            settings.max_file_size_mb = max_file_size_mb;
        }
        if let Some(allowed_qualities) = self.allowed_qualities {
            settings.allowed_qualities = allowed_qualities;
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("the rate-limit window must be at least one second")]
    ZeroWindow,
    #[error("the rate-limit window of {0}s exceeds the {max}s maximum", max = MAX_WINDOW_SECONDS)]
    WindowTooLong(u64),
    #[error("the maximum file size must be at least 1 MB")]
    ZeroMaxFileSize,
    #[error("at least one quality tier must stay allowed")]
    NoQualities,
    #[error("invalid quality label {0:?}")]
    InvalidQuality(String),
}

/// Snapshot-based settings holder.
///
/// Readers get an `Arc` to an immutable record; the writer builds a complete
/// replacement under the write lock, so a reader sees either the old record
/// or the new one and never a mix of both.
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(Settings::default())),
        }
    }
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Result<Self, SettingsError> {
        initial.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(initial)),
        })
    }

    pub fn get(&self) -> Arc<Settings> {
        Arc::clone(&self.current.read())
    }

    pub fn update(&self, update: SettingsUpdate) -> Result<Arc<Settings>, SettingsError> {
        let mut current = self.current.write();
        let mut next = Settings::clone(&current);
        update.apply_to(&mut next);
        next.validate()?;

        let next = Arc::new(next);
        *current = Arc::clone(&next);
        info!(
            "Settings updated: rate_limit={} window={}s maintenance={} max_file_size={}MB qualities={:?}",
            next.rate_limit,
            next.window_seconds,
            next.maintenance,
            next.max_file_size_mb,
            next.allowed_qualities
        );
        Ok(next)
    }
}
