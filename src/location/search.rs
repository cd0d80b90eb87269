//! Place search with a guaranteed non-empty fallback.
//!
//! Flow:  empty query → popular places
//!        text query  → remote search → (failure or nothing) synthetic entry + local matches

use super::distance::distance;
use super::places::{
    popular_places, PlaceCandidate, PlaceQuery, PlacesSearch, PopularPlace, POPULAR_ACCURACY_M,
};
use super::resolver::DEFAULT_PRECISE_THRESHOLD_M;
use super::types::{
    nominal_accuracy, Address, Classification, Coordinates, LocationFix, LocationSource,
    SearchResult,
};
use rand::{thread_rng, Rng};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_RADIUS_M: f64 = 75_000.0;
pub const DEFAULT_LIMIT: usize = 15;
pub const DEFAULT_FALLBACK_CAP: usize = 8;

const REMOTE_CONFIDENCE_CAP: u8 = 95;
const DEFAULT_RELEVANCE: u8 = 50;
const SYNTHETIC_CONFIDENCE: u8 = 40;
const POPULAR_RELEVANCE: u8 = 60;
/// Max jitter applied to the synthetic entry, per axis, in degrees.
const SYNTHETIC_JITTER_DEG: f64 = 0.005;

/// Gombe, Kinshasa.
pub const DEFAULT_CENTER: Coordinates = Coordinates {
    latitude: -4.3033,
    longitude: 15.3105,
};

pub struct SearchEngine {
    places: Option<Arc<dyn PlacesSearch>>,
    offline: bool,
    default_center: Coordinates,
    radius_m: f64,
    limit: usize,
    fallback_cap: usize,
    precise_threshold_m: f64,
}

impl SearchEngine {
    pub fn new(places: Option<Arc<dyn PlacesSearch>>) -> Self {
        Self {
            places,
            offline: false,
            default_center: DEFAULT_CENTER,
            radius_m: DEFAULT_RADIUS_M,
            limit: DEFAULT_LIMIT,
            fallback_cap: DEFAULT_FALLBACK_CAP,
            precise_threshold_m: DEFAULT_PRECISE_THRESHOLD_M,
        }
    }

    pub fn with_default_center(mut self, center: Coordinates) -> Self {
        self.default_center = center;
        self
    }

    pub fn with_radius(mut self, radius_m: f64) -> Self {
        self.radius_m = radius_m;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Cap on the fallback list, synthetic entry included. Never below 1.
    pub fn with_fallback_cap(mut self, cap: usize) -> Self {
        self.fallback_cap = cap.max(1);
        self
    }

    pub fn with_precise_threshold(mut self, threshold_m: f64) -> Self {
        self.precise_threshold_m = threshold_m;
        self
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// The curated list, annotated with distance from `reference`.
    pub fn popular(&self, reference: Option<&LocationFix>) -> Vec<SearchResult> {
        popular_places()
            .iter()
            .filter_map(|place| self.popular_result(place, reference))
            .collect()
    }

    /// Search for `query` around `reference` (or the default center).
    ///
    /// An empty query yields the popular list; a failed or empty remote
    /// search yields a synthetic "search this text" entry followed by local
    /// matches. The result is never empty.
    pub async fn search_places(
        &self,
        query: &str,
        reference: Option<&LocationFix>,
    ) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return self.popular(reference);
        }

        if let (false, Some(places)) = (self.offline, &self.places) {
            let request = PlaceQuery {
                query: query.to_string(),
                center: reference.map(|r| r.coordinates()).unwrap_or(self.default_center),
                radius_m: self.radius_m,
                limit: self.limit,
            };
            match places.search(&request).await {
                Ok(candidates) => {
                    let results: Vec<_> = candidates
                        .into_iter()
                        .enumerate()
                        .filter_map(|(i, c)| self.remote_result(i, c, reference))
                        .collect();
                    if !results.is_empty() {
                        debug!(query, count = results.len(), "remote search results");
                        return results;
                    }
                    debug!(query, "remote search returned nothing; using local fallback");
                }
                Err(e) => warn!(query, error = %e, "remote search failed; using local fallback"),
            }
        }

        self.fallback(query, reference)
    }

    fn fallback(&self, query: &str, reference: Option<&LocationFix>) -> Vec<SearchResult> {
        let mut results = Vec::with_capacity(self.fallback_cap);
        results.extend(self.synthetic_result(query, reference));
        results.extend(
            popular_places()
                .iter()
                .filter(|place| place.matches(query))
                .filter_map(|place| self.popular_result(place, reference))
                .map(|r| SearchResult {
                    relevance_score: POPULAR_RELEVANCE,
                    ..r
                }),
        );
        results.truncate(self.fallback_cap);
        results
    }

    fn popular_result(
        &self,
        place: &PopularPlace,
        reference: Option<&LocationFix>,
    ) -> Option<SearchResult> {
        let fix = LocationFix::new(
            place.coordinates(),
            POPULAR_ACCURACY_M,
            LocationSource::Fallback,
            self.precise_threshold_m,
        )
        .ok()?
        .enriched(&Address {
            formatted: format!("{}, {}", place.title, place.subtitle),
            ..Address::default()
        });
        Some(SearchResult {
            id: place.id.to_string(),
            title: place.title.to_string(),
            subtitle: place.subtitle.to_string(),
            relevance_score: fix.confidence(),
            is_popular: true,
            distance: reference.map(|r| distance(r.coordinates(), fix.coordinates())),
            fix,
        })
    }

    fn remote_result(
        &self,
        index: usize,
        candidate: PlaceCandidate,
        reference: Option<&LocationFix>,
    ) -> Option<SearchResult> {
        let relevance = candidate.relevance_score.unwrap_or(DEFAULT_RELEVANCE).min(100);
        let confidence = relevance.min(REMOTE_CONFIDENCE_CAP);
        let coordinates = match Coordinates::new(candidate.latitude, candidate.longitude) {
            Ok(c) => c,
            Err(e) => {
                debug!(title = %candidate.title, error = %e, "dropping remote candidate");
                return None;
            }
        };
        let formatted = if candidate.subtitle.is_empty() {
            candidate.title.clone()
        } else {
            format!("{}, {}", candidate.title, candidate.subtitle)
        };
        let fix = LocationFix::new(
            coordinates,
            nominal_accuracy(confidence),
            LocationSource::Network,
            self.precise_threshold_m,
        )
        .ok()?
        .with_confidence(confidence)
        // A named place the user picked is precise whatever its nominal radius.
        .with_classification(Classification::Precise)
        .enriched(&Address {
            formatted,
            place_id: candidate.place_id.clone(),
            ..Address::default()
        });
        Some(SearchResult {
            id: candidate
                .place_id
                .clone()
                .unwrap_or_else(|| format!("remote-{}", index)),
            title: candidate.title,
            subtitle: candidate.subtitle,
            relevance_score: relevance,
            is_popular: false,
            distance: reference.map(|r| distance(r.coordinates(), fix.coordinates())),
            fix,
        })
    }

    /// A selectable entry for the raw text, placed near the reference point.
    fn synthetic_result(
        &self,
        query: &str,
        reference: Option<&LocationFix>,
    ) -> Option<SearchResult> {
        let center = reference.map(|r| r.coordinates()).unwrap_or(self.default_center);
        let coordinates = jitter(center);
        let fix = LocationFix::new(
            coordinates,
            nominal_accuracy(SYNTHETIC_CONFIDENCE),
            LocationSource::Fallback,
            self.precise_threshold_m,
        )
        .ok()?
        .with_confidence(SYNTHETIC_CONFIDENCE)
        .with_classification(Classification::Approximate)
        .enriched(&Address {
            formatted: query.to_string(),
            ..Address::default()
        });
        Some(SearchResult {
            id: "search-text".to_string(),
            title: query.to_string(),
            subtitle: "Search this address".to_string(),
            relevance_score: SYNTHETIC_CONFIDENCE,
            is_popular: false,
            distance: reference.map(|r| distance(r.coordinates(), fix.coordinates())),
            fix,
        })
    }
}

fn jitter(center: Coordinates) -> Coordinates {
    let mut rng = thread_rng();
    let range = -SYNTHETIC_JITTER_DEG..=SYNTHETIC_JITTER_DEG;
    Coordinates {
        latitude: (center.latitude + rng.gen_range(range.clone())).clamp(-90.0, 90.0),
        longitude: (center.longitude + rng.gen_range(range)).clamp(-180.0, 180.0),
    }
}
