//! Single-slot persisted cache of the last fetched snapshot.
//!
//! Every read re-validates the stored record against the caller's coordinates,
//! so one slot can be shared by all sessions. Storage and (de)serialization
//! failures never escape this module: a failed write only loses persistence,
//! and an unreadable record is a miss.

use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};

use crate::{
    clock::{Clock, SystemClock},
    model::{CacheEntry, Coordinates, WeatherSnapshot},
    storage::KeyValueStorage,
};

pub const CACHE_KEY: &str = "weather_cache";

/// Roughly one kilometre of latitude.
pub const DEFAULT_PROXIMITY_THRESHOLD_DEG: f64 = 0.01;

/// How far ahead of the local clock a saved timestamp may be before the record
/// is treated as corrupt.
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct CacheStore {
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    proximity_deg: f64,
}

impl CacheStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            proximity_deg: DEFAULT_PROXIMITY_THRESHOLD_DEG,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_proximity_threshold(mut self, degrees: f64) -> Self {
        self.proximity_deg = degrees;
        self
    }

    /// Replace the stored record. Write failures are logged and dropped.
    pub fn save(&self, payload: &WeatherSnapshot, coords: Coordinates) {
        let entry = CacheEntry {
            timestamp: self.clock.now().timestamp_millis(),
            coords,
            data: payload.clone(),
        };

        let encoded = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to encode weather cache entry: {}", e);
                return;
            }
        };

        match self.storage.set_string(CACHE_KEY, &encoded) {
            Ok(()) => tracing::debug!("Weather cache saved for {}", coords),
            Err(e) => tracing::warn!("Weather cache not persisted: {}", e),
        }
    }

    /// Stored payload if it is at most `max_age` old and was fetched near `coords`.
    ///
    /// The age bound is inclusive: a record exactly `max_age` old is still served.
    pub fn load(&self, coords: Coordinates, max_age: Duration) -> Option<WeatherSnapshot> {
        let (entry, elapsed_ms) = self.entry_near(coords)?;

        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        if elapsed_ms > max_age_ms {
            tracing::debug!(
                "Weather cache expired ({} ms old, limit {} ms)",
                elapsed_ms,
                max_age_ms
            );
            return None;
        }

        Some(entry.data)
    }

    /// Stored payload for `coords` regardless of age. Used as the offline fallback.
    pub fn load_stale(&self, coords: Coordinates) -> Option<WeatherSnapshot> {
        self.entry_near(coords).map(|(entry, _)| entry.data)
    }

    /// Whole seconds since the last save, or `None` when nothing is stored.
    /// A record saved slightly ahead of the local clock reports zero.
    pub fn age(&self) -> Option<i64> {
        let (_, elapsed_ms) = self.read_entry()?;
        Some(elapsed_ms.max(0) / 1000)
    }

    /// When the stored record was written, if there is one.
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        let (entry, _) = self.read_entry()?;
        DateTime::<Utc>::from_timestamp_millis(entry.timestamp)
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove_string(CACHE_KEY) {
            tracing::warn!("Failed to clear weather cache: {}", e);
        }
    }

    fn entry_near(&self, coords: Coordinates) -> Option<(CacheEntry, i64)> {
        let (entry, elapsed_ms) = self.read_entry()?;
        if !entry.coords.is_near(&coords, self.proximity_deg) {
            tracing::debug!(
                "Weather cache is for {} but {} was requested",
                entry.coords,
                coords
            );
            return None;
        }
        Some((entry, elapsed_ms))
    }

    /// The stored record and its age in milliseconds.
    fn read_entry(&self) -> Option<(CacheEntry, i64)> {
        let raw = match self.storage.get_string(CACHE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Weather cache unreadable: {}", e);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Ignoring corrupt weather cache entry: {}", e);
                return None;
            }
        };

        if !entry.coords.latitude.is_finite() || !entry.coords.longitude.is_finite() {
            tracing::debug!("Ignoring weather cache entry with invalid coordinates");
            return None;
        }

        let elapsed_ms = match self.clock.now().timestamp_millis().checked_sub(entry.timestamp) {
            Some(ms) if ms >= -MAX_CLOCK_SKEW_MS => ms,
            _ => {
                tracing::debug!(
                    "Ignoring weather cache entry with out-of-range timestamp {}",
                    entry.timestamp
                );
                return None;
            }
        };

        Some((entry, elapsed_ms))
    }
}
