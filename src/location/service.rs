//! The engine facade handed to UI code: one resolver, one tracking session
//! and one search engine sharing configuration and collaborators.

use super::cache::FixCache;
use super::consensus::IpConsensus;
use super::geocode::{NominatimReverse, ReverseGeocoder};
use super::http::{JsonTransport, UreqTransport};
use super::places::{NominatimPlaces, PlacesSearch};
use super::providers::server::{HttpServerFallback, ServerIpFallback};
use super::providers::{PositionProvider, ProviderChain};
use super::resolver::{AcquireOptions, LocationResolver};
use super::search::SearchEngine;
use super::tracking::{TrackingHandle, TrackingSession, TrackingState};
use super::types::{LocationError, LocationFix, SearchResult};
use crate::config::EngineConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// External collaborators. Anything left `None` is simply not used.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub native: Option<Arc<dyn PositionProvider>>,
    pub browser: Option<Arc<dyn PositionProvider>>,
    pub geocoder: Option<Arc<dyn ReverseGeocoder>>,
    pub places: Option<Arc<dyn PlacesSearch>>,
    /// Transport for the IP-geolocation services.
    pub ip_transport: Option<Arc<dyn JsonTransport>>,
    pub server_fallback: Option<Arc<dyn ServerIpFallback>>,
}

impl Collaborators {
    /// HTTP-backed collaborators built from `config`. Device providers are
    /// attached by the host with [`with_native`](Self::with_native) and
    /// [`with_browser`](Self::with_browser).
    pub fn http(config: &EngineConfig) -> Self {
        let transport: Arc<dyn JsonTransport> = Arc::new(UreqTransport::new(&config.user_agent));
        let timeout = config.enrichment_timeout();
        Self {
            native: None,
            browser: None,
            geocoder: Some(Arc::new(NominatimReverse::new(
                config.nominatim_url.clone(),
                timeout,
                transport.clone(),
            ))),
            places: Some(Arc::new(NominatimPlaces::new(
                config.nominatim_url.clone(),
                timeout,
                transport.clone(),
            ))),
            server_fallback: config.server_fallback_url.as_ref().map(|url| {
                Arc::new(HttpServerFallback::new(
                    url.clone(),
                    config.server_fallback_timeout(),
                    transport.clone(),
                )) as Arc<dyn ServerIpFallback>
            }),
            ip_transport: Some(transport),
        }
    }

    pub fn with_native(mut self, provider: Arc<dyn PositionProvider>) -> Self {
        self.native = Some(provider);
        self
    }

    pub fn with_browser(mut self, provider: Arc<dyn PositionProvider>) -> Self {
        self.browser = Some(provider);
        self
    }
}

pub struct LocationService {
    resolver: LocationResolver,
    tracking: TrackingSession,
    search: SearchEngine,
}

impl LocationService {
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Result<Self, LocationError> {
        config.validate()?;

        let cache = match &config.cache_path {
            Some(path) => FixCache::load_from(path.clone()),
            None => FixCache::load(),
        }
        .with_ttl(config.cache_ttl());
        let chain = ProviderChain::new(collaborators.native.clone(), collaborators.browser.clone());

        let mut resolver = LocationResolver::new(cache, chain.clone())
            .with_precise_threshold(config.precise_threshold_m)
            .with_enrichment_timeout(config.enrichment_timeout());
        let mut tracking = TrackingSession::new(chain)
            .with_precise_threshold(config.precise_threshold_m)
            .with_enrichment_timeout(config.enrichment_timeout());
        if let Some(geocoder) = &collaborators.geocoder {
            resolver = resolver.with_geocoder(geocoder.clone());
            tracking = tracking.with_geocoder(geocoder.clone());
        }
        if let Some(transport) = collaborators.ip_transport.clone() {
            if !config.ip_providers.is_empty() {
                let consensus = IpConsensus::from_providers(&config.ip_providers, transport)?
                    .with_preferred(config.preferred_ip_provider.clone())
                    .with_precise_threshold(config.precise_threshold_m);
                resolver = resolver.with_consensus(consensus);
            }
        }
        if let Some(server) = collaborators.server_fallback.clone() {
            resolver = resolver.with_server_fallback(server);
        }

        let search = SearchEngine::new(collaborators.places.clone())
            .with_default_center(config.default_center)
            .with_radius(config.search_radius_m)
            .with_limit(config.search_limit)
            .with_fallback_cap(config.fallback_cap)
            .with_precise_threshold(config.precise_threshold_m);

        let mut service = Self {
            resolver,
            tracking,
            search,
        };
        service.set_offline(config.offline);
        Ok(service)
    }

    /// Offline mode for every component.
    pub fn set_offline(&mut self, offline: bool) {
        self.resolver.set_offline(offline);
        self.tracking.set_offline(offline);
        self.search.set_offline(offline);
        info!(offline, "location service mode set");
    }

    pub async fn get_current_position(
        &mut self,
        opts: &AcquireOptions,
    ) -> Result<LocationFix, LocationError> {
        self.resolver.get_current_position(opts).await
    }

    pub async fn get_approximate_position(&self) -> Result<LocationFix, LocationError> {
        self.resolver.get_approximate_position().await
    }

    pub async fn get_consensus_fix(&self) -> Option<LocationFix> {
        self.resolver.get_consensus_fix().await
    }

    pub async fn start_tracking<F>(
        &mut self,
        on_update: F,
        opts: &AcquireOptions,
    ) -> Result<TrackingHandle, LocationError>
    where
        F: Fn(LocationFix) + Send + Sync + 'static,
    {
        self.tracking.start_tracking(on_update, opts).await
    }

    pub async fn start_tracking_channel(
        &mut self,
        opts: &AcquireOptions,
    ) -> Result<(TrackingHandle, mpsc::Receiver<LocationFix>), LocationError> {
        self.tracking.start_tracking_channel(opts).await
    }

    pub fn stop_tracking(&self) {
        self.tracking.stop_tracking();
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.tracking.state()
    }

    pub async fn search_places(
        &self,
        query: &str,
        reference: Option<&LocationFix>,
    ) -> Vec<SearchResult> {
        self.search.search_places(query, reference).await
    }

    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }
}
