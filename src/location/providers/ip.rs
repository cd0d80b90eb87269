//! IP-geolocation adapters.
//!
//! Every public IP service answers with its own JSON shape. Each one gets an
//! [`IpAdapter`] that knows its endpoint and turns the raw body into a
//! [`NormalizedFix`]; the adapters live in a static registry keyed by name.
//! Supporting a new service means adding one adapter and one registry line.

use crate::location::http::JsonTransport;
use crate::location::types::{Coordinates, LocationError};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// IP geolocation is city-scale at best; no IP-derived accuracy is tighter.
pub const IP_ACCURACY_FLOOR_M: f64 = 1_000.0;

/// Provider-agnostic answer from one IP service.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFix {
    pub provider: &'static str,
    pub coordinates: Coordinates,
    /// Self-declared accuracy in meters, floored at [`IP_ACCURACY_FLOOR_M`].
    pub accuracy: f64,
    pub city: Option<String>,
    pub country: Option<String>,
}

pub trait IpAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn endpoint(&self) -> &'static str;

    /// Accuracy this service claims for its city-level answers.
    fn nominal_accuracy_m(&self) -> f64 {
        5_000.0
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedFix, LocationError>;
}

fn normalize(
    provider: &'static str,
    lat: Option<f64>,
    lon: Option<f64>,
    accuracy: f64,
    city: Option<String>,
    country: Option<String>,
) -> Result<NormalizedFix, LocationError> {
    let missing =
        |field: &str| LocationError::InvalidResponse(format!("{}: no {}", provider, field));
    let lat = lat.ok_or_else(|| missing("latitude"))?;
    let lon = lon.ok_or_else(|| missing("longitude"))?;
    let coordinates = Coordinates::new(lat, lon)?;
    Ok(NormalizedFix {
        provider,
        coordinates,
        accuracy: accuracy.max(IP_ACCURACY_FLOOR_M),
        city: city.filter(|c| !c.is_empty()),
        country: country.filter(|c| !c.is_empty()),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(provider: &str, raw: &Value) -> Result<T, LocationError> {
    T::deserialize(raw).map_err(|e| LocationError::InvalidResponse(format!("{}: {}", provider, e)))
}

// ─── ipapi.co ───────────────────────────────────────────────────

struct IpApiCo;

#[derive(Deserialize)]
struct IpApiCoBody {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    city: Option<String>,
    country_name: Option<String>,
}

impl IpAdapter for IpApiCo {
    fn name(&self) -> &'static str {
        "ipapi.co"
    }

    fn endpoint(&self) -> &'static str {
        "https://ipapi.co/json/"
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedFix, LocationError> {
        let body: IpApiCoBody = decode(self.name(), raw)?;
        if body.error {
            return Err(LocationError::InvalidResponse(format!(
                "{}: {}",
                self.name(),
                body.reason.unwrap_or_else(|| "error".into())
            )));
        }
        normalize(
            self.name(),
            body.latitude,
            body.longitude,
            self.nominal_accuracy_m(),
            body.city,
            body.country_name,
        )
    }
}

// ─── ip-api.com ─────────────────────────────────────────────────

struct IpApiCom;

#[derive(Deserialize)]
struct IpApiComBody {
    status: Option<String>,
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
    country: Option<String>,
}

impl IpAdapter for IpApiCom {
    fn name(&self) -> &'static str {
        "ip-api.com"
    }

    fn endpoint(&self) -> &'static str {
        "http://ip-api.com/json/?fields=status,message,lat,lon,city,country"
    }

    fn nominal_accuracy_m(&self) -> f64 {
        10_000.0
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedFix, LocationError> {
        let body: IpApiComBody = decode(self.name(), raw)?;
        if body.status.as_deref() != Some("success") {
            return Err(LocationError::InvalidResponse(format!(
                "{}: {}",
                self.name(),
                body.message.unwrap_or_else(|| "status not success".into())
            )));
        }
        normalize(
            self.name(),
            body.lat,
            body.lon,
            self.nominal_accuracy_m(),
            body.city,
            body.country,
        )
    }
}

// ─── ipwho.is ───────────────────────────────────────────────────

struct IpWhoIs;

#[derive(Deserialize)]
struct IpWhoIsBody {
    #[serde(default)]
    success: bool,
    message: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    city: Option<String>,
    country: Option<String>,
}

impl IpAdapter for IpWhoIs {
    fn name(&self) -> &'static str {
        "ipwho.is"
    }

    fn endpoint(&self) -> &'static str {
        "https://ipwho.is/"
    }

    fn nominal_accuracy_m(&self) -> f64 {
        8_000.0
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedFix, LocationError> {
        let body: IpWhoIsBody = decode(self.name(), raw)?;
        if !body.success {
            return Err(LocationError::InvalidResponse(format!(
                "{}: {}",
                self.name(),
                body.message.unwrap_or_else(|| "lookup failed".into())
            )));
        }
        normalize(
            self.name(),
            body.latitude,
            body.longitude,
            self.nominal_accuracy_m(),
            body.city,
            body.country,
        )
    }
}

// ─── freeipapi.com ──────────────────────────────────────────────

struct FreeIpApi;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FreeIpApiBody {
    latitude: Option<f64>,
    longitude: Option<f64>,
    city_name: Option<String>,
    country_name: Option<String>,
}

impl IpAdapter for FreeIpApi {
    fn name(&self) -> &'static str {
        "freeipapi.com"
    }

    fn endpoint(&self) -> &'static str {
        "https://freeipapi.com/api/json"
    }

    fn nominal_accuracy_m(&self) -> f64 {
        10_000.0
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedFix, LocationError> {
        let body: FreeIpApiBody = decode(self.name(), raw)?;
        // The service answers 0,0 when it has no record.
        if body.latitude == Some(0.0) && body.longitude == Some(0.0) {
            return Err(LocationError::InvalidResponse(format!("{}: no record", self.name())));
        }
        normalize(
            self.name(),
            body.latitude,
            body.longitude,
            self.nominal_accuracy_m(),
            body.city_name,
            body.country_name,
        )
    }
}

// ─── ipinfo.io ──────────────────────────────────────────────────

struct IpInfo;

#[derive(Deserialize)]
struct IpInfoBody {
    /// "lat,lon"
    loc: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

impl IpAdapter for IpInfo {
    fn name(&self) -> &'static str {
        "ipinfo.io"
    }

    fn endpoint(&self) -> &'static str {
        "https://ipinfo.io/json"
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedFix, LocationError> {
        let body: IpInfoBody = decode(self.name(), raw)?;
        let (lat, lon) = match body.loc.as_deref().and_then(|l| l.split_once(',')) {
            Some((lat, lon)) => (lat.trim().parse().ok(), lon.trim().parse().ok()),
            None => (None, None),
        };
        normalize(self.name(), lat, lon, self.nominal_accuracy_m(), body.city, body.country)
    }
}

// ─── Registry ───────────────────────────────────────────────────

static REGISTRY: &[&dyn IpAdapter] = &[&IpApiCo, &IpApiCom, &IpWhoIs, &FreeIpApi, &IpInfo];

/// Look up a registered adapter by name (case-insensitive).
pub fn adapter(name: &str) -> Option<&'static dyn IpAdapter> {
    REGISTRY
        .iter()
        .copied()
        .find(|a| a.name().eq_ignore_ascii_case(name))
}

pub fn registered_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|a| a.name())
}

/// Query one service, bounded by `timeout`.
pub async fn locate(
    adapter: &dyn IpAdapter,
    transport: &dyn JsonTransport,
    timeout: Duration,
) -> Result<NormalizedFix, LocationError> {
    let raw = tokio::time::timeout(timeout, transport.get_json(adapter.endpoint(), timeout))
        .await
        .map_err(|_| LocationError::ProviderTimeout {
            provider: adapter.name().to_string(),
            timeout,
        })??;
    adapter.parse(&raw)
}
