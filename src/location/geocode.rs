//! Reverse geocoding: turning a coordinate fix into a human-readable address.
//!
//! Enrichment is always best-effort. [`enrich`] never fails; when the
//! geocoder is missing, slow or broken the fix is returned with its formatted
//! coordinates as the address.

use super::http::JsonTransport;
use super::types::{Address, Coordinates, LocationError, LocationFix};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, coordinates: Coordinates) -> Result<Address, LocationError>;
}

/// Attach an address to `fix`, degrading to a coordinate string on any failure.
pub async fn enrich(
    fix: &LocationFix,
    geocoder: Option<&dyn ReverseGeocoder>,
    timeout: Duration,
) -> LocationFix {
    let Some(geocoder) = geocoder else {
        return fix.with_coordinate_address();
    };
    match tokio::time::timeout(timeout, geocoder.reverse(fix.coordinates())).await {
        Ok(Ok(address)) => {
            debug!(address = %address.formatted, "fix enriched");
            fix.enriched(&address)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "reverse geocoding failed; using coordinates as address");
            fix.with_coordinate_address()
        }
        Err(_) => {
            warn!(?timeout, "reverse geocoding timed out; using coordinates as address");
            fix.with_coordinate_address()
        }
    }
}

// ─── Nominatim ──────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct NominatimReverseBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    place_id: Option<serde_json::Value>,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Deserialize, Debug, Default)]
struct NominatimAddress {
    suburb: Option<String>,
    neighbourhood: Option<String>,
    city_district: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    country: Option<String>,
}

/// OpenStreetMap Nominatim `/reverse`.
pub struct NominatimReverse {
    base_url: String,
    timeout: Duration,
    transport: Arc<dyn JsonTransport>,
}

impl NominatimReverse {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        transport: Arc<dyn JsonTransport>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            transport,
        }
    }

    fn parse(raw: &serde_json::Value) -> Result<Address, LocationError> {
        let body = NominatimReverseBody::deserialize(raw)
            .map_err(|e| LocationError::EnrichmentFailed(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(LocationError::EnrichmentFailed(err));
        }
        let addr = body.address.unwrap_or_default();
        let district = addr.suburb.or(addr.neighbourhood).or(addr.city_district);
        let city = addr.city.or(addr.town).or(addr.village);

        // Prefer the short "district, city" form over Nominatim's long display name.
        let formatted = match (&district, &city) {
            (Some(d), Some(c)) if d != c => format!("{}, {}", d, c),
            (_, Some(c)) => c.clone(),
            (Some(d), None) => d.clone(),
            (None, None) => body
                .display_name
                .clone()
                .ok_or_else(|| LocationError::EnrichmentFailed("no address in response".into()))?,
        };

        let place_id = body.place_id.map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });

        Ok(Address {
            formatted,
            city,
            country: addr.country,
            place_id,
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimReverse {
    async fn reverse(&self, coordinates: Coordinates) -> Result<Address, LocationError> {
        let url = format!(
            "{}/reverse?lat={}&lon={}&format=json&zoom=16&addressdetails=1",
            self.base_url, coordinates.latitude, coordinates.longitude
        );
        let raw = self
            .transport
            .get_json(&url, self.timeout)
            .await
            .map_err(|e| LocationError::EnrichmentFailed(e.to_string()))?;
        Self::parse(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::testing::{ScriptedTransport, StaticGeocoder};
    use crate::location::types::LocationSource;
    use serde_json::json;

    fn raw_fix() -> LocationFix {
        LocationFix::new(
            Coordinates::new(-4.3033, 15.3105).unwrap(),
            15.0,
            LocationSource::Native,
            20.0,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_short_form() {
        let addr = NominatimReverse::parse(&json!({
            "place_id": 123456,
            "display_name": "Avenue du Commerce, Gombe, Kinshasa, République démocratique du Congo",
            "address": {
                "suburb": "Gombe",
                "city": "Kinshasa",
                "country": "République démocratique du Congo"
            }
        }))
        .unwrap();
        assert_eq!(addr.formatted, "Gombe, Kinshasa");
        assert_eq!(addr.city.as_deref(), Some("Kinshasa"));
        assert_eq!(addr.place_id.as_deref(), Some("123456"));
    }

    #[test]
    fn test_parse_display_name_only() {
        let addr = NominatimReverse::parse(&json!({"display_name": "Somewhere, Earth"})).unwrap();
        assert_eq!(addr.formatted, "Somewhere, Earth");
    }

    #[test]
    fn test_parse_error_body() {
        let err = NominatimReverse::parse(&json!({"error": "Unable to geocode"})).unwrap_err();
        assert!(matches!(err, LocationError::EnrichmentFailed(_)));
    }

    #[tokio::test]
    async fn test_nominatim_reverse_url() {
        let transport = Arc::new(ScriptedTransport::new().respond(
            "https://nominatim.test/reverse?lat=-4.3033&lon=15.3105&format=json&zoom=16&addressdetails=1",
            json!({"address": {"suburb": "Gombe", "city": "Kinshasa"}}),
        ));
        let geocoder = NominatimReverse::new(
            "https://nominatim.test/",
            Duration::from_secs(5),
            transport.clone(),
        );
        let addr = geocoder.reverse(raw_fix().coordinates()).await.unwrap();
        assert_eq!(addr.formatted, "Gombe, Kinshasa");
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_enrich_success() {
        let geocoder = StaticGeocoder::address("Gombe, Kinshasa");
        let fix = enrich(&raw_fix(), Some(&geocoder), Duration::from_secs(5)).await;
        assert_eq!(fix.address(), Some("Gombe, Kinshasa"));
    }

    #[tokio::test]
    async fn test_enrich_failure_degrades() {
        let geocoder = StaticGeocoder::failing();
        let fix = enrich(&raw_fix(), Some(&geocoder), Duration::from_secs(5)).await;
        assert_eq!(fix.address(), Some("4.3033\u{00B0}S, 15.3105\u{00B0}E"));
        assert_eq!(fix.accuracy(), 15.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_timeout_degrades() {
        let geocoder = StaticGeocoder::hanging();
        let fix = enrich(&raw_fix(), Some(&geocoder), Duration::from_secs(3)).await;
        assert!(fix.address().unwrap().contains("15.3105"));
    }

    #[tokio::test]
    async fn test_enrich_offline() {
        let fix = enrich(&raw_fix(), None, Duration::from_secs(5)).await;
        assert!(fix.is_enriched());
        assert!(fix.city().is_none());
    }
}
