//! Core types for the location engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Where a fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationSource {
    Native,
    Browser,
    Network,
    IpConsensus,
    Cache,
    Fallback,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Browser => write!(f, "browser"),
            Self::Network => write!(f, "network"),
            Self::IpConsensus => write!(f, "ip-consensus"),
            Self::Cache => write!(f, "cache"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Coarse precision bucket shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Precise,
    Approximate,
    Fallback,
}

impl Classification {
    /// `Precise` iff the accuracy radius is within the threshold.
    pub fn for_accuracy(accuracy_m: f64, precise_threshold_m: f64) -> Self {
        if accuracy_m <= precise_threshold_m {
            Self::Precise
        } else {
            Self::Approximate
        }
    }
}

/// WGS84 latitude/longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, LocationError> {
        let coords = Self { latitude, longitude };
        if coords.is_valid() {
            Ok(coords)
        } else {
            Err(LocationError::InvalidFix(format!(
                "coordinates out of range: ({}, {})",
                latitude, longitude
            )))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_coords(self.latitude, self.longitude))
    }
}

/// Human-readable coordinates, e.g. "4.3033°S, 15.3105°E".
///
/// Used as the address of a fix when reverse geocoding is unavailable.
pub fn format_coords(lat: f64, lon: f64) -> String {
    let ns = if lat >= 0.0 { 'N' } else { 'S' };
    let ew = if lon >= 0.0 { 'E' } else { 'W' };
    format!("{:.4}\u{00B0}{}, {:.4}\u{00B0}{}", lat.abs(), ns, lon.abs(), ew)
}

// ─── Confidence scoring ─────────────────────────────────────────

/// Accuracy bands (upper bound in meters, confidence). Tighter accuracy
/// always maps to a higher score.
const CONFIDENCE_BANDS: &[(f64, u8)] = &[
    (5.0, 98),
    (10.0, 95),
    (20.0, 85),
    (50.0, 70),
    (100.0, 60),
    (500.0, 45),
    (2_000.0, 35),
    (10_000.0, 25),
];

const CONFIDENCE_FLOOR: u8 = 15;

/// Score a measured accuracy radius on the 0–100 confidence scale.
pub fn confidence_for_accuracy(accuracy_m: f64) -> u8 {
    CONFIDENCE_BANDS
        .iter()
        .find(|(max, _)| accuracy_m <= *max)
        .map(|(_, score)| *score)
        .unwrap_or(CONFIDENCE_FLOOR)
}

/// Inverse of the scoring table for fixes whose confidence is dictated by a
/// collaborator (search results) rather than measured.
pub fn nominal_accuracy(confidence: u8) -> f64 {
    match confidence {
        90..=u8::MAX => 10.0,
        75..=89 => 20.0,
        60..=74 => 100.0,
        40..=59 => 500.0,
        _ => 2_000.0,
    }
}

// ─── Fix ────────────────────────────────────────────────────────

/// Reverse-geocoding result attached to a fix.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    pub formatted: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub place_id: Option<String>,
}

/// A point-in-time location estimate.
///
/// Fields are read-only; every "modifier" returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    coordinates: Coordinates,
    accuracy: f64,
    confidence: u8,
    source: LocationSource,
    classification: Classification,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    place_id: Option<String>,
}

impl LocationFix {
    /// Build a fix from a measured accuracy. Confidence follows the scoring
    /// table and classification follows `precise_threshold_m`.
    pub fn new(
        coordinates: Coordinates,
        accuracy: f64,
        source: LocationSource,
        precise_threshold_m: f64,
    ) -> Result<Self, LocationError> {
        if !coordinates.is_valid() {
            return Err(LocationError::InvalidFix(format!(
                "coordinates out of range: {:?}",
                coordinates
            )));
        }
        if !(accuracy.is_finite() && accuracy > 0.0) {
            return Err(LocationError::InvalidFix(format!(
                "accuracy must be positive, got {}",
                accuracy
            )));
        }
        Ok(Self {
            coordinates,
            accuracy,
            confidence: confidence_for_accuracy(accuracy),
            source,
            classification: Classification::for_accuracy(accuracy, precise_threshold_m),
            timestamp: Utc::now(),
            address: None,
            city: None,
            country: None,
            place_id: None,
        })
    }

    pub fn coordinates(&self) -> Coordinates {
        self.coordinates
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates.longitude
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn source(&self) -> LocationSource {
        self.source
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn place_id(&self) -> Option<&str> {
        self.place_id.as_deref()
    }

    pub fn is_enriched(&self) -> bool {
        self.address.is_some()
    }

    pub fn observed_at(self, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, ..self }
    }

    pub fn with_source(self, source: LocationSource) -> Self {
        Self { source, ..self }
    }

    pub fn with_confidence(self, confidence: u8) -> Self {
        Self {
            confidence: confidence.min(100),
            ..self
        }
    }

    pub fn with_classification(self, classification: Classification) -> Self {
        Self {
            classification,
            ..self
        }
    }

    pub fn with_locality(self, city: Option<String>, country: Option<String>) -> Self {
        Self {
            city,
            country,
            ..self
        }
    }

    /// A copy of this fix carrying the reverse-geocoded address.
    pub fn enriched(&self, address: &Address) -> Self {
        Self {
            address: Some(address.formatted.clone()),
            city: address.city.clone().or_else(|| self.city.clone()),
            country: address.country.clone().or_else(|| self.country.clone()),
            place_id: address.place_id.clone().or_else(|| self.place_id.clone()),
            ..self.clone()
        }
    }

    /// A copy of this fix whose address is its own formatted coordinates.
    pub fn with_coordinate_address(&self) -> Self {
        Self {
            address: Some(self.coordinates.to_string()),
            ..self.clone()
        }
    }
}

// ─── Search ─────────────────────────────────────────────────────

/// One selectable entry returned by place search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub fix: LocationFix,
    pub relevance_score: u8,
    pub is_popular: bool,
    /// Meters from the reference fix, when one was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

// ─── Errors ─────────────────────────────────────────────────────

/// Location engine errors.
///
/// Provider-level variants never reach callers of the acquisition chain on
/// their own; they are collected into [`LocationError::AllProvidersFailed`].
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location permission denied by {provider}")]
    PermissionDenied { provider: String },

    #[error("{provider} gave no position within {timeout:?}")]
    ProviderTimeout { provider: String, timeout: Duration },

    #[error("{provider} is not available in this runtime")]
    ProviderUnavailable { provider: String },

    #[error("{provider} reported \u{00B1}{accuracy:.0} m, need \u{2264} {required:.0} m")]
    InsufficientAccuracy {
        provider: String,
        accuracy: f64,
        required: f64,
    },

    #[error("could not determine your location ({} attempt(s) failed); enter an address manually", .attempts.len())]
    AllProvidersFailed { attempts: Vec<LocationError> },

    #[error("reverse geocoding failed: {0}")]
    EnrichmentFailed(String),

    #[error("place search failed: {0}")]
    RemoteSearchFailed(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid fix: {0}")]
    InvalidFix(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cache I/O error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LocationError {
    /// True when the caller should ask the user to type an address instead.
    pub fn requires_manual_entry(&self) -> bool {
        matches!(self, Self::AllProvidersFailed { .. })
    }

    /// Failures after which a provider will not produce further readings.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::ProviderUnavailable { .. }
        )
    }
}
