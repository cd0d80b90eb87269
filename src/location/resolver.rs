//! Location resolver: orchestrates the acquisition fallback chain.
//!
//! Precise flow:      Cache (low-accuracy callers only) → native bridge → browser → error
//! Approximate flow:  IP consensus → server IP fallback → last cached fix → error
//!
//! The precise flow never drops to the approximate one unless the caller
//! opts in with [`AcquireOptions::fallback_to_ip`].

use super::cache::FixCache;
use super::consensus::IpConsensus;
use super::geocode::{self, ReverseGeocoder};
use super::providers::server::ServerIpFallback;
use super::providers::{PositionProvider, PositionRequest, ProviderChain};
use super::types::{Classification, LocationError, LocationFix};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PRECISE_THRESHOLD_M: f64 = 20.0;
pub const DEFAULT_ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-call acquisition options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquireOptions {
    pub enable_high_accuracy: bool,
    /// Bound on each provider attempt.
    pub timeout: Duration,
    /// Forwarded to providers: how old a provider-side reading may be.
    pub maximum_age: Duration,
    /// Largest accuracy radius (meters) the caller accepts.
    pub min_accuracy: f64,
    pub enable_caching: bool,
    /// Run the approximate flow when every device provider fails.
    pub fallback_to_ip: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(40),
            maximum_age: Duration::from_secs(180),
            min_accuracy: 20.0,
            enable_caching: true,
            fallback_to_ip: false,
        }
    }
}

impl AcquireOptions {
    /// Reject options no provider reading could be checked against.
    pub fn validate(&self) -> Result<(), LocationError> {
        if !(self.min_accuracy.is_finite() && self.min_accuracy > 0.0) {
            return Err(LocationError::Config(format!(
                "min_accuracy must be a positive number of meters, got {}",
                self.min_accuracy
            )));
        }
        Ok(())
    }

    pub fn position_request(&self) -> PositionRequest {
        PositionRequest {
            enable_high_accuracy: self.enable_high_accuracy,
            timeout: self.timeout,
            maximum_age: self.maximum_age,
        }
    }
}

/// The location resolver with its fallback pipeline.
pub struct LocationResolver {
    cache: FixCache,
    chain: ProviderChain,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
    consensus: Option<IpConsensus>,
    server_fallback: Option<Arc<dyn ServerIpFallback>>,
    offline: bool,
    precise_threshold_m: f64,
    enrichment_timeout: Duration,
}

impl LocationResolver {
    pub fn new(cache: FixCache, chain: ProviderChain) -> Self {
        Self {
            cache,
            chain,
            geocoder: None,
            consensus: None,
            server_fallback: None,
            offline: false,
            precise_threshold_m: DEFAULT_PRECISE_THRESHOLD_M,
            enrichment_timeout: DEFAULT_ENRICHMENT_TIMEOUT,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_consensus(mut self, consensus: IpConsensus) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn with_server_fallback(mut self, fallback: Arc<dyn ServerIpFallback>) -> Self {
        self.server_fallback = Some(fallback);
        self
    }

    pub fn with_precise_threshold(mut self, threshold_m: f64) -> Self {
        self.precise_threshold_m = threshold_m;
        self
    }

    pub fn with_enrichment_timeout(mut self, timeout: Duration) -> Self {
        self.enrichment_timeout = timeout;
        self
    }

    /// Set offline mode. Skips network calls (enrichment, IP services).
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn cache(&self) -> &FixCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Acquire one fix through the precise chain.
    pub async fn get_current_position(
        &mut self,
        opts: &AcquireOptions,
    ) -> Result<LocationFix, LocationError> {
        opts.validate()?;

        // 1. Cache, only for callers that tolerate a non-fresh reading
        if opts.enable_caching && !opts.enable_high_accuracy {
            if let Some(fix) = self.cache.get() {
                info!(accuracy = fix.accuracy(), "using cached fix");
                return Ok(fix);
            }
        }

        // 2. Device providers, strictly in priority order
        let request = opts.position_request();
        let providers: Vec<Arc<dyn PositionProvider>> =
            self.chain.in_priority_order().cloned().collect();
        let mut attempts = Vec::new();
        for provider in providers {
            match self.attempt(provider.as_ref(), &request, opts.min_accuracy).await {
                Ok(raw) => {
                    info!(
                        provider = provider.name(),
                        accuracy = raw.accuracy(),
                        confidence = raw.confidence(),
                        "fix accepted"
                    );
                    let fix = self.enrich(&raw).await;
                    if opts.enable_caching {
                        self.cache.put(&fix);
                    }
                    return Ok(fix);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "provider attempt failed");
                    attempts.push(e);
                }
            }
        }

        // 3. Approximate flow, opt-in only
        if opts.fallback_to_ip {
            info!("device providers exhausted; falling back to IP estimation");
            match self.approximate().await {
                Ok(fix) => return Ok(fix),
                Err(more) => attempts.extend(more),
            }
        }

        Err(LocationError::AllProvidersFailed { attempts })
    }

    /// The IP consensus on its own. `None` offline, unconfigured, or when no
    /// IP service answered.
    pub async fn get_consensus_fix(&self) -> Option<LocationFix> {
        if self.offline {
            return None;
        }
        self.consensus.as_ref()?.consensus_fix().await
    }

    /// A coarse fix from IP services, the server fallback or the last cached
    /// fix. Never written to the cache.
    pub async fn get_approximate_position(&self) -> Result<LocationFix, LocationError> {
        self.approximate()
            .await
            .map_err(|attempts| LocationError::AllProvidersFailed { attempts })
    }

    async fn attempt(
        &self,
        provider: &dyn PositionProvider,
        request: &PositionRequest,
        min_accuracy: f64,
    ) -> Result<LocationFix, LocationError> {
        if !provider.is_available() {
            return Err(LocationError::ProviderUnavailable {
                provider: provider.name().to_string(),
            });
        }
        debug!(provider = provider.name(), timeout = ?request.timeout, "requesting position");
        let raw = tokio::time::timeout(request.timeout, provider.current_position(request))
            .await
            .map_err(|_| LocationError::ProviderTimeout {
                provider: provider.name().to_string(),
                timeout: request.timeout,
            })??;
        if raw.accuracy > min_accuracy {
            return Err(LocationError::InsufficientAccuracy {
                provider: provider.name().to_string(),
                accuracy: raw.accuracy,
                required: min_accuracy,
            });
        }
        raw.into_fix(provider.source(), self.precise_threshold_m)
    }

    async fn approximate(&self) -> Result<LocationFix, Vec<LocationError>> {
        let mut attempts = Vec::new();

        if !self.offline {
            // 1. IP consensus
            if let Some(consensus) = &self.consensus {
                match consensus.consensus_fix().await {
                    Some(fix) => return Ok(self.enrich(&fix).await),
                    None => attempts.push(LocationError::ProviderUnavailable {
                        provider: "ip-consensus".into(),
                    }),
                }
            }

            // 2. Server-side IP fallback
            if let Some(server) = &self.server_fallback {
                match server
                    .locate()
                    .await
                    .and_then(|loc| loc.into_fix(self.precise_threshold_m))
                {
                    Ok(fix) => {
                        info!(city = ?fix.city(), "using server IP fallback");
                        return Ok(self.enrich(&fix).await);
                    }
                    Err(e) => {
                        warn!(error = %e, "server IP fallback failed");
                        attempts.push(e);
                    }
                }
            }
        }

        // 3. Most recent cached fix, whatever its age
        if let Some(fix) = self.cache.last_known() {
            info!("using last known fix");
            return Ok(fix.with_classification(Classification::Fallback));
        }

        Err(attempts)
    }

    async fn enrich(&self, fix: &LocationFix) -> LocationFix {
        let geocoder = if self.offline { None } else { self.geocoder.as_deref() };
        geocode::enrich(fix, geocoder, self.enrichment_timeout).await
    }
}
