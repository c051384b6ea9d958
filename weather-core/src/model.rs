use serde::{Deserialize, Serialize};

/// A position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True when both axes differ by at most `threshold_deg`.
    pub fn is_near(&self, other: &Coordinates, threshold_deg: f64) -> bool {
        (self.latitude - other.latitude).abs() <= threshold_deg
            && (self.longitude - other.longitude).abs() <= threshold_deg
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Weather data as returned by a provider. Never inspected by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeatherSnapshot(serde_json::Value);

impl WeatherSnapshot {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for WeatherSnapshot {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// The single persisted record, replaced wholesale on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Epoch milliseconds of the save.
    pub timestamp: i64,
    pub coords: Coordinates,
    pub data: WeatherSnapshot,
}
