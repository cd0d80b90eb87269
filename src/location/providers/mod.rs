//! Position providers: the on-device bridge, browser geolocation, IP services
//! and the server-side IP fallback.
//!
//! Device-grade sources implement [`PositionProvider`]. IP services are
//! described by [`ip::IpAdapter`] entries in a static registry.

pub mod bridge;
pub mod ip;
pub mod server;

use super::types::{Coordinates, LocationError, LocationFix, LocationSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use bridge::{BridgeEvent, HostBridge};

/// An unprocessed reading from a device-grade provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPosition {
    pub coordinates: Coordinates,
    /// Radius of uncertainty in meters.
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

impl RawPosition {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            coordinates: Coordinates {
                latitude,
                longitude,
            },
            accuracy,
            timestamp: Utc::now(),
        }
    }

    pub fn into_fix(
        self,
        source: LocationSource,
        precise_threshold_m: f64,
    ) -> Result<LocationFix, LocationError> {
        Ok(LocationFix::new(self.coordinates, self.accuracy, source, precise_threshold_m)?
            .observed_at(self.timestamp))
    }
}

/// Options forwarded to a provider for one reading or one watch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRequest {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest provider-side reading the caller will accept.
    pub maximum_age: Duration,
}

/// Releases a provider-level listener exactly once, on [`Subscription::release`]
/// or on drop.
pub struct Subscription {
    label: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!(provider = %self.label, "releasing position subscription");
            release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("released", &self.is_released())
            .finish()
    }
}

/// A continuous-update stream plus the handle that tears it down.
#[derive(Debug)]
pub struct PositionWatch {
    pub updates: mpsc::Receiver<Result<RawPosition, LocationError>>,
    pub subscription: Subscription,
}

/// A device-grade acquisition source (native bridge or browser API).
#[async_trait]
pub trait PositionProvider: Send + Sync {
    fn name(&self) -> &str;

    fn source(&self) -> LocationSource;

    /// Whether the runtime exposes this capability at all.
    fn is_available(&self) -> bool {
        true
    }

    /// One reading. Callers bound this with their own timeout.
    async fn current_position(
        &self,
        request: &PositionRequest,
    ) -> Result<RawPosition, LocationError>;

    /// Start a continuous subscription.
    async fn watch_position(
        &self,
        request: &PositionRequest,
    ) -> Result<PositionWatch, LocationError>;
}

/// Device providers in priority order: native bridge, then browser.
#[derive(Clone, Default)]
pub struct ProviderChain {
    native: Option<Arc<dyn PositionProvider>>,
    browser: Option<Arc<dyn PositionProvider>>,
}

impl ProviderChain {
    pub fn new(
        native: Option<Arc<dyn PositionProvider>>,
        browser: Option<Arc<dyn PositionProvider>>,
    ) -> Self {
        Self { native, browser }
    }

    /// Every configured provider, highest priority first.
    pub fn in_priority_order(&self) -> impl Iterator<Item = &Arc<dyn PositionProvider>> {
        self.native.iter().chain(self.browser.iter())
    }

    /// The provider a tracking session should bind to.
    pub fn preferred(&self) -> Option<Arc<dyn PositionProvider>> {
        self.in_priority_order().find(|p| p.is_available()).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.native.is_none() && self.browser.is_none()
    }
}
