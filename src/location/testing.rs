//! Scripted collaborators for unit tests.

use super::geocode::ReverseGeocoder;
use super::http::JsonTransport;
use super::places::{PlaceCandidate, PlaceQuery, PlacesSearch};
use super::types::{Address, Coordinates, LocationError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone)]
enum Reply {
    Json(Value),
    Fail(String),
    Hang,
    Delay(Duration, Value),
}

/// Answers URLs from a script. Unknown URLs fail with a network error.
#[derive(Default)]
pub struct ScriptedTransport {
    exact: Vec<(String, Reply)>,
    prefixed: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, body: Value) -> Self {
        self.exact.push((url.to_string(), Reply::Json(body)));
        self
    }

    pub fn respond_prefix(mut self, prefix: &str, body: Value) -> Self {
        self.prefixed.push((prefix.to_string(), Reply::Json(body)));
        self
    }

    pub fn respond_after(mut self, url: &str, delay: Duration, body: Value) -> Self {
        self.exact.push((url.to_string(), Reply::Delay(delay, body)));
        self
    }

    pub fn fail(mut self, url: &str, message: &str) -> Self {
        self.exact.push((url.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn hang(mut self, url: &str) -> Self {
        self.exact.push((url.to_string(), Reply::Hang));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, url: &str) -> Option<Reply> {
        self.exact
            .iter()
            .find(|(u, _)| u == url)
            .or_else(|| self.prefixed.iter().find(|(p, _)| url.starts_with(p.as_str())))
            .map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl JsonTransport for ScriptedTransport {
    async fn get_json(&self, url: &str, _timeout: Duration) -> Result<Value, LocationError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.lookup(url) {
            Some(Reply::Json(body)) => Ok(body),
            Some(Reply::Fail(msg)) => Err(LocationError::Network(msg)),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Delay(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            None => Err(LocationError::Network(format!("unscripted url {}", url))),
        }
    }
}

enum GeocodeReply {
    Address(Address),
    Fail,
    Hang,
}

/// Reverse geocoder with a fixed answer.
pub struct StaticGeocoder {
    reply: GeocodeReply,
    calls: AtomicUsize,
}

impl StaticGeocoder {
    pub fn address(formatted: &str) -> Self {
        Self {
            reply: GeocodeReply::Address(Address {
                formatted: formatted.to_string(),
                city: Some("Kinshasa".into()),
                country: Some("DR Congo".into()),
                place_id: None,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: GeocodeReply::Fail,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn hanging() -> Self {
        Self {
            reply: GeocodeReply::Hang,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReverseGeocoder for StaticGeocoder {
    async fn reverse(&self, _coordinates: Coordinates) -> Result<Address, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            GeocodeReply::Address(a) => Ok(a.clone()),
            GeocodeReply::Fail => Err(LocationError::EnrichmentFailed("geocoder down".into())),
            GeocodeReply::Hang => std::future::pending().await,
        }
    }
}

/// Places search with a fixed answer; remembers the last query.
pub struct ScriptedPlaces {
    reply: Result<Vec<PlaceCandidate>, String>,
    last_query: Mutex<Option<PlaceQuery>>,
}

impl ScriptedPlaces {
    pub fn results(candidates: Vec<PlaceCandidate>) -> Self {
        Self {
            reply: Ok(candidates),
            last_query: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err("places backend unreachable".into()),
            last_query: Mutex::new(None),
        }
    }

    pub fn last_query(&self) -> Option<PlaceQuery> {
        self.last_query.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlacesSearch for ScriptedPlaces {
    async fn search(&self, query: &PlaceQuery) -> Result<Vec<PlaceCandidate>, LocationError> {
        *self.last_query.lock().unwrap() = Some(query.clone());
        self.reply
            .clone()
            .map_err(LocationError::RemoteSearchFailed)
    }
}

pub fn candidate(title: &str, lat: f64, lon: f64, relevance: Option<u8>) -> PlaceCandidate {
    PlaceCandidate {
        title: title.to_string(),
        subtitle: "Kinshasa".to_string(),
        latitude: lat,
        longitude: lon,
        relevance_score: relevance,
        place_id: None,
    }
}
