//! IP consensus: ask every configured IP service at once and reduce the
//! answers to one coarse fix.
//!
//! Scatter/gather, never first-wins: all requests are awaited to settlement,
//! failures are dropped, and the survivors are averaged.

use super::http::JsonTransport;
use super::providers::ip::{self, IpAdapter, NormalizedFix};
use super::types::{Classification, Coordinates, LocationError, LocationFix, LocationSource};
use crate::config::IpProviderConfig;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CONFIDENCE_PER_RESPONSE: u32 = 20;
const CONFIDENCE_CAP: u32 = 75;

/// One IP service and its timeout.
#[derive(Clone, Copy)]
pub struct IpSource {
    pub adapter: &'static dyn IpAdapter,
    pub timeout: Duration,
}

pub struct IpConsensus {
    sources: Vec<IpSource>,
    preferred: Option<String>,
    transport: Arc<dyn JsonTransport>,
    precise_threshold_m: f64,
}

impl IpConsensus {
    pub fn new(sources: Vec<IpSource>, transport: Arc<dyn JsonTransport>) -> Self {
        Self {
            sources,
            preferred: None,
            transport,
            precise_threshold_m: 20.0,
        }
    }

    /// Resolve configured provider names against the adapter registry.
    pub fn from_providers(
        providers: &[IpProviderConfig],
        transport: Arc<dyn JsonTransport>,
    ) -> Result<Self, LocationError> {
        let sources = providers
            .iter()
            .map(|provider| {
                ip::adapter(&provider.name)
                    .map(|adapter| IpSource {
                        adapter,
                        timeout: Duration::from_secs(provider.timeout_secs),
                    })
                    .ok_or_else(|| {
                        LocationError::Config(format!(
                            "unknown IP provider '{}' (known: {})",
                            provider.name,
                            ip::registered_names().collect::<Vec<_>>().join(", ")
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(sources, transport))
    }

    /// City/country are taken from this provider when it answers.
    pub fn with_preferred(mut self, name: Option<String>) -> Self {
        self.preferred = name;
        self
    }

    pub fn with_precise_threshold(mut self, threshold_m: f64) -> Self {
        self.precise_threshold_m = threshold_m;
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Fan out to every source, wait for all of them, and reduce.
    pub async fn consensus_fix(&self) -> Option<LocationFix> {
        let attempts = self.sources.iter().map(|source| async move {
            let result = ip::locate(source.adapter, self.transport.as_ref(), source.timeout).await;
            (source.adapter.name(), result)
        });

        let responses: Vec<NormalizedFix> = join_all(attempts)
            .await
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(fix) => Some(fix),
                Err(e) => {
                    debug!(provider = name, error = %e, "IP provider dropped from consensus");
                    None
                }
            })
            .collect();

        info!(
            responded = responses.len(),
            asked = self.sources.len(),
            "IP consensus settled"
        );
        reduce(&responses, self.preferred.as_deref(), self.precise_threshold_m)
    }
}

/// Unweighted centroid, optimistic accuracy, count-based confidence.
pub fn reduce(
    responses: &[NormalizedFix],
    preferred: Option<&str>,
    precise_threshold_m: f64,
) -> Option<LocationFix> {
    let first = responses.first()?;
    let n = responses.len() as f64;

    let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut sum_lat, mut sum_lon) = (0.0, 0.0);
    let mut accuracy = f64::INFINITY;
    for r in responses {
        let c = r.coordinates;
        min_lat = min_lat.min(c.latitude);
        max_lat = max_lat.max(c.latitude);
        min_lon = min_lon.min(c.longitude);
        max_lon = max_lon.max(c.longitude);
        sum_lat += c.latitude;
        sum_lon += c.longitude;
        accuracy = accuracy.min(r.accuracy.max(ip::IP_ACCURACY_FLOOR_M));
    }
    // Summation rounding must not push the mean outside the inputs' range.
    let centroid = Coordinates {
        latitude: (sum_lat / n).clamp(min_lat, max_lat),
        longitude: (sum_lon / n).clamp(min_lon, max_lon),
    };

    let confidence = (responses.len() as u32 * CONFIDENCE_PER_RESPONSE).min(CONFIDENCE_CAP) as u8;

    let locality = preferred
        .and_then(|name| responses.iter().find(|r| r.provider.eq_ignore_ascii_case(name)))
        .unwrap_or(first);

    LocationFix::new(centroid, accuracy, LocationSource::IpConsensus, precise_threshold_m)
        .ok()
        .map(|fix| {
            fix.with_confidence(confidence)
                .with_classification(Classification::Approximate)
                .with_locality(locality.city.clone(), locality.country.clone())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::testing::ScriptedTransport;
    use serde_json::json;

    fn normalized(
        provider: &'static str,
        lat: f64,
        lon: f64,
        accuracy: f64,
        city: &str,
    ) -> NormalizedFix {
        NormalizedFix {
            provider,
            coordinates: Coordinates::new(lat, lon).unwrap(),
            accuracy,
            city: Some(city.to_string()),
            country: Some("DR Congo".to_string()),
        }
    }

    fn provider(name: &str, timeout_secs: u64) -> IpProviderConfig {
        IpProviderConfig {
            name: name.to_string(),
            timeout_secs,
        }
    }

    #[test]
    fn test_reduce_empty() {
        assert!(reduce(&[], None, 20.0).is_none());
    }

    #[test]
    fn test_reduce_centroid_and_accuracy() {
        let responses = vec![
            normalized("ipapi.co", -4.30, 15.30, 5_000.0, "Kinshasa"),
            normalized("ipwho.is", -4.40, 15.40, 8_000.0, "Limete"),
            normalized("ip-api.com", -4.35, 15.20, 10_000.0, "Ngaliema"),
        ];
        let fix = reduce(&responses, None, 20.0).unwrap();
        assert!((fix.latitude() + 4.35).abs() < 1e-9);
        assert!((fix.longitude() - 15.30).abs() < 1e-9);
        assert_eq!(fix.accuracy(), 5_000.0);
        assert_eq!(fix.confidence(), 60);
        assert_eq!(fix.source(), LocationSource::IpConsensus);
        assert_eq!(fix.classification(), Classification::Approximate);
        assert_eq!(fix.city(), Some("Kinshasa"));
    }

    #[test]
    fn test_reduce_confidence_cap() {
        let responses: Vec<_> = (0..5)
            .map(|i| normalized("ipinfo.io", -4.3 - i as f64 * 0.01, 15.3, 5_000.0, "Kinshasa"))
            .collect();
        assert_eq!(reduce(&responses, None, 20.0).unwrap().confidence(), 75);
        assert_eq!(reduce(&responses[..1], None, 20.0).unwrap().confidence(), 20);
    }

    #[test]
    fn test_reduce_floors_tight_accuracy() {
        let responses = vec![normalized("custom", -4.30, 15.30, 8.0, "Kinshasa")];
        let fix = reduce(&responses, None, 20.0).unwrap();
        assert_eq!(fix.accuracy(), ip::IP_ACCURACY_FLOOR_M);
        assert_eq!(fix.confidence(), 20);
        assert_eq!(fix.classification(), Classification::Approximate);
    }

    #[test]
    fn test_reduce_preferred_locality() {
        let responses = vec![
            normalized("ipapi.co", -4.30, 15.30, 5_000.0, "Kinshasa"),
            normalized("ipwho.is", -4.40, 15.40, 8_000.0, "Limete"),
        ];
        let fix = reduce(&responses, Some("ipwho.is"), 20.0).unwrap();
        assert_eq!(fix.city(), Some("Limete"));
        let fix = reduce(&responses, Some("freeipapi.com"), 20.0).unwrap();
        assert_eq!(fix.city(), Some("Kinshasa"));
    }

    #[test]
    fn test_centroid_within_bounding_box() {
        let samples = [
            vec![(0.1, 0.1), (0.1, 0.1), (0.1, 0.1)],
            vec![(-4.3276, 15.3136), (-4.3217, 15.3125), (-4.33, 15.31), (-4.32, 15.30)],
            vec![(59.3293, 18.0686), (59.33, 18.07)],
            vec![
                (-33.87, 151.21),
                (-33.86, 151.20),
                (-33.88, 151.22),
                (-33.9, 151.1),
                (-33.8, 151.3),
            ],
        ];
        for points in samples {
            let responses: Vec<_> = points
                .iter()
                .map(|&(lat, lon)| normalized("ipapi.co", lat, lon, 5_000.0, "X"))
                .collect();
            let fix = reduce(&responses, None, 20.0).unwrap();
            let lats = points.iter().map(|p| p.0);
            let lons = points.iter().map(|p| p.1);
            let bounds = |(a, b): (f64, f64), x: f64| (a.min(x), b.max(x));
            let (min_lat, max_lat) = lats.clone().fold((f64::MAX, f64::MIN), bounds);
            let (min_lon, max_lon) = lons.clone().fold((f64::MAX, f64::MIN), bounds);
            assert!(fix.latitude() >= min_lat && fix.latitude() <= max_lat);
            assert!(fix.longitude() >= min_lon && fix.longitude() <= max_lon);
        }
    }

    #[test]
    fn test_from_providers_rejects_unknown() {
        let transport = Arc::new(ScriptedTransport::new());
        let unknown = [provider("ipapi.co", 5), provider("made-up", 5)];
        assert!(IpConsensus::from_providers(&unknown, transport.clone()).is_err());
        let known = [provider("ipapi.co", 5), provider("ipwho.is", 5)];
        let consensus = IpConsensus::from_providers(&known, transport).unwrap();
        assert_eq!(consensus.source_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consensus_tolerates_partial_failure() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(
                    "https://ipapi.co/json/",
                    json!({
                        "latitude": -4.32,
                        "longitude": 15.31,
                        "city": "Kinshasa",
                        "country_name": "DR Congo"
                    }),
                )
                .respond_after(
                    "https://ipwho.is/",
                    Duration::from_secs(1),
                    json!({
                        "success": true,
                        "latitude": -4.34,
                        "longitude": 15.33,
                        "city": "Kinshasa",
                        "country": "DR Congo"
                    }),
                )
                .fail("https://ipinfo.io/json", "connection reset")
                .hang("https://freeipapi.com/api/json"),
        );
        let consensus = IpConsensus::from_providers(
            &[
                provider("ipapi.co", 5),
                provider("ipwho.is", 5),
                provider("ipinfo.io", 5),
                provider("freeipapi.com", 3),
            ],
            transport.clone(),
        )
        .unwrap();

        let fix = consensus.consensus_fix().await.unwrap();
        assert_eq!(fix.confidence(), 40);
        assert!((fix.latitude() + 4.33).abs() < 1e-9);
        assert_eq!(fix.accuracy(), 5_000.0);
        // Every source was asked.
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consensus_all_fail() {
        let transport = Arc::new(ScriptedTransport::new().hang("https://ipapi.co/json/"));
        let providers = [provider("ipapi.co", 2), provider("ip-api.com", 2)];
        let consensus = IpConsensus::from_providers(&providers, transport).unwrap();
        assert!(consensus.consensus_fix().await.is_none());
    }
}
