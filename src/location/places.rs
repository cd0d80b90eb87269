//! Places: the remote search collaborator and the curated popular-places list.

use super::geocode::NOMINATIM_URL;
use super::http::{urlencode, JsonTransport};
use super::types::{Coordinates, LocationError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

// ─── Curated dataset ────────────────────────────────────────────

/// A hand-picked landmark offered when the user has not typed anything yet.
#[derive(Debug, Clone, Copy)]
pub struct PopularPlace {
    pub id: &'static str,
    pub title: &'static str,
    pub subtitle: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl PopularPlace {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.lat,
            longitude: self.lon,
        }
    }

    /// Case-insensitive substring match on title or subtitle.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.title.to_lowercase().contains(&q) || self.subtitle.to_lowercase().contains(&q)
    }
}

/// Landmarks are surveyed points, so they carry a tight accuracy.
pub const POPULAR_ACCURACY_M: f64 = 15.0;

const POPULAR_PLACES: &[PopularPlace] = &[
    PopularPlace {
        id: "gombe-centre",
        title: "Gombe",
        subtitle: "Centre-ville, Kinshasa",
        lat: -4.3033, lon: 15.3105,
    },
    PopularPlace {
        id: "ndjili-airport",
        title: "A\u{00E9}roport international de N'djili",
        subtitle: "N'djili, Kinshasa",
        lat: -4.3858, lon: 15.4446,
    },
    PopularPlace {
        id: "marche-central",
        title: "March\u{00E9} Central",
        subtitle: "Gombe, Kinshasa",
        lat: -4.3167, lon: 15.3136,
    },
    PopularPlace {
        id: "boulevard-30-juin",
        title: "Boulevard du 30 Juin",
        subtitle: "Gombe, Kinshasa",
        lat: -4.3050, lon: 15.3070,
    },
    PopularPlace {
        id: "gare-centrale",
        title: "Gare Centrale",
        subtitle: "Gombe, Kinshasa",
        lat: -4.3000, lon: 15.3130,
    },
    PopularPlace {
        id: "beach-ngobila",
        title: "Beach Ngobila",
        subtitle: "Gombe, Kinshasa",
        lat: -4.3000, lon: 15.3170,
    },
    PopularPlace {
        id: "stade-des-martyrs",
        title: "Stade des Martyrs",
        subtitle: "Lingwala, Kinshasa",
        lat: -4.3311, lon: 15.2967,
    },
    PopularPlace {
        id: "palais-du-peuple",
        title: "Palais du Peuple",
        subtitle: "Lingwala, Kinshasa",
        lat: -4.3306, lon: 15.3008,
    },
    PopularPlace {
        id: "rond-point-victoire",
        title: "Rond-point Victoire",
        subtitle: "Kalamu, Kinshasa",
        lat: -4.3386, lon: 15.3087,
    },
    PopularPlace {
        id: "matonge",
        title: "Matonge",
        subtitle: "Kalamu, Kinshasa",
        lat: -4.3336, lon: 15.3147,
    },
    PopularPlace {
        id: "echangeur-limete",
        title: "\u{00C9}changeur de Limete",
        subtitle: "Limete, Kinshasa",
        lat: -4.3561, lon: 15.3372,
    },
    PopularPlace {
        id: "kintambo-magasin",
        title: "Kintambo Magasin",
        subtitle: "Kintambo, Kinshasa",
        lat: -4.3297, lon: 15.2739,
    },
    PopularPlace {
        id: "unikin",
        title: "Universit\u{00E9} de Kinshasa",
        subtitle: "Lemba, Kinshasa",
        lat: -4.4203, lon: 15.3088,
    },
];

pub fn popular_places() -> &'static [PopularPlace] {
    POPULAR_PLACES
}

// ─── Remote search ──────────────────────────────────────────────

/// Parameters handed to the places-search collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceQuery {
    pub query: String,
    pub center: Coordinates,
    pub radius_m: f64,
    pub limit: usize,
}

/// One candidate as returned by the collaborator, in its own order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaceCandidate {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub relevance_score: Option<u8>,
    #[serde(default)]
    pub place_id: Option<String>,
}

#[async_trait]
pub trait PlacesSearch: Send + Sync {
    async fn search(&self, query: &PlaceQuery) -> Result<Vec<PlaceCandidate>, LocationError>;
}

#[derive(Deserialize, Debug, Clone)]
struct NominatimResult {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    place_id: Option<serde_json::Value>,
}

const METERS_PER_DEGREE: f64 = 111_320.0;

/// OpenStreetMap Nominatim `/search`, bounded to a box around the center.
pub struct NominatimPlaces {
    base_url: String,
    timeout: Duration,
    transport: Arc<dyn JsonTransport>,
}

impl NominatimPlaces {
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

    pub fn public(transport: Arc<dyn JsonTransport>) -> Self {
        Self::new(NOMINATIM_URL, Duration::from_secs(10), transport)
    }

    fn url(&self, q: &PlaceQuery) -> String {
        let dlat = q.radius_m / METERS_PER_DEGREE;
        let cos_lat = q.center.latitude.to_radians().cos().max(0.01);
        let dlon = q.radius_m / (METERS_PER_DEGREE * cos_lat);
        let viewbox = format!(
            "{:.5},{:.5},{:.5},{:.5}",
            (q.center.longitude - dlon).max(-180.0),
            (q.center.latitude + dlat).min(90.0),
            (q.center.longitude + dlon).min(180.0),
            (q.center.latitude - dlat).max(-90.0),
        );
        format!(
            "{}/search?q={}&format=json&limit={}&viewbox={}&bounded=1",
            self.base_url,
            urlencode(&q.query),
            q.limit,
            viewbox
        )
    }

    fn to_candidate(r: NominatimResult) -> Option<PlaceCandidate> {
        let latitude: f64 = r.lat.parse().ok()?;
        let longitude: f64 = r.lon.parse().ok()?;
        let mut parts = r.display_name.splitn(2, ',');
        let title = parts.next().unwrap_or("").trim().to_string();
        let subtitle = parts.next().unwrap_or("").trim().to_string();
        let relevance_score = r
            .importance
            .map(|i| (i * 100.0).round().clamp(0.0, 100.0) as u8);
        let place_id = r.place_id.map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        Some(PlaceCandidate {
            title,
            subtitle,
            latitude,
            longitude,
            relevance_score,
            place_id,
        })
    }
}

#[async_trait]
impl PlacesSearch for NominatimPlaces {
    async fn search(&self, query: &PlaceQuery) -> Result<Vec<PlaceCandidate>, LocationError> {
        let raw = self
            .transport
            .get_json(&self.url(query), self.timeout)
            .await
            .map_err(|e| LocationError::RemoteSearchFailed(e.to_string()))?;
        let results: Vec<NominatimResult> = Vec::deserialize(&raw)
            .map_err(|e| LocationError::RemoteSearchFailed(e.to_string()))?;
        Ok(results.into_iter().filter_map(Self::to_candidate).collect())
    }
}
