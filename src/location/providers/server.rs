//! Server-side IP fallback: a backend function that geolocates the caller's
//! public IP. Lower priority than everything else; never used on the primary
//! acquisition path.

use super::ip::IP_ACCURACY_FLOOR_M;
use crate::location::http::JsonTransport;
use crate::location::types::{
    Classification, Coordinates, LocationError, LocationFix, LocationSource,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerIpLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl ServerIpLocation {
    pub fn into_fix(self, precise_threshold_m: f64) -> Result<LocationFix, LocationError> {
        let coordinates = Coordinates::new(self.latitude, self.longitude)?;
        let accuracy = self.accuracy.unwrap_or(IP_ACCURACY_FLOOR_M).max(IP_ACCURACY_FLOOR_M);
        Ok(
            LocationFix::new(coordinates, accuracy, LocationSource::Fallback, precise_threshold_m)?
                .with_classification(Classification::Fallback)
                .with_locality(self.city, self.country),
        )
    }
}

#[async_trait]
pub trait ServerIpFallback: Send + Sync {
    async fn locate(&self) -> Result<ServerIpLocation, LocationError>;
}

/// Calls a backend endpoint that answers with a [`ServerIpLocation`] body.
pub struct HttpServerFallback {
    url: String,
    timeout: Duration,
    transport: Arc<dyn JsonTransport>,
}

impl HttpServerFallback {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        transport: Arc<dyn JsonTransport>,
    ) -> Self {
        Self {
            url: url.into(),
            timeout,
            transport,
        }
    }
}

#[async_trait]
impl ServerIpFallback for HttpServerFallback {
    async fn locate(&self) -> Result<ServerIpLocation, LocationError> {
        let request = self.transport.get_json(&self.url, self.timeout);
        let raw = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| LocationError::ProviderTimeout {
                provider: "server-fallback".into(),
                timeout: self.timeout,
            })??;
        ServerIpLocation::deserialize(&raw)
            .map_err(|e| LocationError::InvalidResponse(format!("server-fallback: {}", e)))
    }
}
