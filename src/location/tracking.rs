//! Continuous tracking: one provider subscription per engine, explicitly
//! released.
//!
//! `Idle → Active → Idle`. Starting again while active stops the previous
//! session first. The provider is chosen once at start; a hard failure of
//! that provider ends the session rather than switching providers.

use super::geocode::{self, ReverseGeocoder};
use super::providers::{ProviderChain, RawPosition, Subscription};
use super::resolver::{
    AcquireOptions, DEFAULT_ENRICHMENT_TIMEOUT, DEFAULT_PRECISE_THRESHOLD_M,
};
use super::types::{LocationError, LocationFix, LocationSource};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHANNEL_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Idle,
    Active,
}

struct ActiveTrack {
    id: u64,
    provider: String,
    task: JoinHandle<()>,
    subscription: Subscription,
}

impl ActiveTrack {
    fn shutdown(mut self) {
        self.subscription.release();
        self.task.abort();
        info!(session = self.id, provider = %self.provider, "tracking stopped");
    }
}

type Slot = Mutex<Option<ActiveTrack>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<ActiveTrack>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clear the slot if it still belongs to session `id`.
fn take_if_current(slot: &Slot, id: u64) -> Option<ActiveTrack> {
    let mut guard = lock(slot);
    if guard.as_ref().map(|t| t.id) == Some(id) {
        guard.take()
    } else {
        None
    }
}

/// Where enriched updates go.
enum Sink {
    Callback(Box<dyn Fn(LocationFix) + Send + Sync>),
    Channel(mpsc::Sender<LocationFix>),
}

impl Sink {
    /// False once the receiving side is gone.
    async fn deliver(&self, fix: LocationFix) -> bool {
        match self {
            Sink::Callback(on_update) => {
                on_update(fix);
                true
            }
            Sink::Channel(tx) => tx.send(fix).await.is_ok(),
        }
    }
}

/// Handle to one tracking session. Stopping a superseded session's handle
/// is a no-op.
#[derive(Debug, Clone)]
pub struct TrackingHandle {
    id: u64,
    slot: Weak<Slot>,
}

impl TrackingHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop this session. Returns false if it had already ended.
    pub fn stop(&self) -> bool {
        let Some(slot) = self.slot.upgrade() else {
            return false;
        };
        match take_if_current(&slot, self.id) {
            Some(track) => {
                track.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot
            .upgrade()
            .map(|slot| lock(&slot).as_ref().map(|t| t.id) == Some(self.id))
            .unwrap_or(false)
    }
}

pub struct TrackingSession {
    chain: ProviderChain,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
    offline: bool,
    precise_threshold_m: f64,
    enrichment_timeout: Duration,
    slot: Arc<Slot>,
    next_id: u64,
}

impl TrackingSession {
    pub fn new(chain: ProviderChain) -> Self {
        Self {
            chain,
            geocoder: None,
            offline: false,
            precise_threshold_m: DEFAULT_PRECISE_THRESHOLD_M,
            enrichment_timeout: DEFAULT_ENRICHMENT_TIMEOUT,
            slot: Arc::new(Mutex::new(None)),
            next_id: 0,
        }
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
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

    /// Offline sessions deliver coordinate-string addresses.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn state(&self) -> TrackingState {
        if lock(&self.slot).is_some() {
            TrackingState::Active
        } else {
            TrackingState::Idle
        }
    }

    /// Start delivering enriched fixes to `on_update`.
    pub async fn start_tracking<F>(
        &mut self,
        on_update: F,
        opts: &AcquireOptions,
    ) -> Result<TrackingHandle, LocationError>
    where
        F: Fn(LocationFix) + Send + Sync + 'static,
    {
        self.start(Sink::Callback(Box::new(on_update)), opts).await
    }

    /// Like [`start_tracking`](Self::start_tracking), but updates arrive on a
    /// channel. The session ends if the receiver is dropped.
    pub async fn start_tracking_channel(
        &mut self,
        opts: &AcquireOptions,
    ) -> Result<(TrackingHandle, mpsc::Receiver<LocationFix>), LocationError> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let handle = self.start(Sink::Channel(tx), opts).await?;
        Ok((handle, rx))
    }

    /// Stop the active session, if any. Idempotent.
    pub fn stop_tracking(&self) {
        if let Some(track) = lock(&self.slot).take() {
            track.shutdown();
        }
    }

    async fn start(
        &mut self,
        sink: Sink,
        opts: &AcquireOptions,
    ) -> Result<TrackingHandle, LocationError> {
        self.stop_tracking();

        let provider = self.chain.preferred().ok_or_else(|| LocationError::ProviderUnavailable {
            provider: "tracking".into(),
        })?;
        let watch = provider.watch_position(&opts.position_request()).await?;

        self.next_id += 1;
        let id = self.next_id;
        let pump = Pump {
            id,
            source: provider.source(),
            provider: provider.name().to_string(),
            geocoder: if self.offline { None } else { self.geocoder.clone() },
            precise_threshold_m: self.precise_threshold_m,
            enrichment_timeout: self.enrichment_timeout,
            slot: self.slot.clone(),
        };

        // Hold the slot while spawning so the task cannot finish before its
        // entry exists.
        let mut guard = lock(&self.slot);
        if let Some(previous) = guard.take() {
            previous.shutdown();
        }
        let task = tokio::spawn(pump.run(watch.updates, sink));
        *guard = Some(ActiveTrack {
            id,
            provider: provider.name().to_string(),
            task,
            subscription: watch.subscription,
        });
        drop(guard);

        info!(session = id, provider = provider.name(), "tracking started");
        Ok(TrackingHandle {
            id,
            slot: Arc::downgrade(&self.slot),
        })
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}

/// The forwarding task for one session.
struct Pump {
    id: u64,
    source: LocationSource,
    provider: String,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
    precise_threshold_m: f64,
    enrichment_timeout: Duration,
    slot: Arc<Slot>,
}

impl Pump {
    async fn run(
        self,
        mut updates: mpsc::Receiver<Result<RawPosition, LocationError>>,
        sink: Sink,
    ) {
        while let Some(update) = updates.recv().await {
            match update {
                Ok(raw) => {
                    let fix = match raw.into_fix(self.source, self.precise_threshold_m) {
                        Ok(fix) => fix,
                        Err(e) => {
                            debug!(session = self.id, error = %e, "skipping invalid reading");
                            continue;
                        }
                    };
                    let fix =
                        geocode::enrich(&fix, self.geocoder.as_deref(), self.enrichment_timeout)
                            .await;
                    if !sink.deliver(fix).await {
                        debug!(session = self.id, "update receiver dropped");
                        break;
                    }
                }
                Err(e) if e.is_hard_failure() => {
                    warn!(
                        session = self.id,
                        provider = %self.provider,
                        error = %e,
                        "tracking provider failed"
                    );
                    break;
                }
                Err(e) => {
                    debug!(session = self.id, error = %e, "transient tracking error");
                }
            }
        }

        // Back to Idle, unless a newer session already took the slot.
        if let Some(track) = take_if_current(&self.slot, self.id) {
            info!(session = self.id, "tracking ended");
            drop(track);
        }
    }
}
