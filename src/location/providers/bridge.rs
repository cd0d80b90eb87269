//! Host-fed position provider.
//!
//! The embedding runtime (a mobile shell's native location callback, or a
//! WebView's `navigator.geolocation` callback) pushes readings into a
//! [`HostBridge`]; the engine consumes them through [`PositionProvider`].

use super::{PositionProvider, PositionRequest, PositionWatch, RawPosition, Subscription};
use crate::location::types::{LocationError, LocationSource};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

const EVENT_BUFFER: usize = 64;
const WATCH_BUFFER: usize = 16;

/// What the host reports from its location callback.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Position(RawPosition),
    PermissionDenied,
    Unavailable,
    Error(String),
}

pub struct HostBridge {
    name: String,
    source: LocationSource,
    available: AtomicBool,
    latest: Mutex<Option<RawPosition>>,
    events: broadcast::Sender<BridgeEvent>,
    watchers: Arc<AtomicUsize>,
}

impl HostBridge {
    pub fn new(name: impl Into<String>, source: LocationSource) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            name: name.into(),
            source,
            available: AtomicBool::new(true),
            latest: Mutex::new(None),
            events,
            watchers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The on-device GPS bridge.
    pub fn native() -> Self {
        Self::new("native", LocationSource::Native)
    }

    /// The browser Geolocation API.
    pub fn browser() -> Self {
        Self::new("browser", LocationSource::Browser)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Called by the host for every reading or failure.
    pub fn publish(&self, event: BridgeEvent) {
        if let BridgeEvent::Position(position) = &event {
            *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(*position);
        }
        // No receivers just means nobody is waiting right now.
        let _ = self.events.send(event);
    }

    pub fn publish_position(&self, position: RawPosition) {
        self.publish(BridgeEvent::Position(position));
    }

    /// Number of live watch subscriptions.
    pub fn active_watches(&self) -> usize {
        self.watchers.load(Ordering::SeqCst)
    }

    fn fresh_latest(&self, request: &PositionRequest) -> Option<RawPosition> {
        let latest = (*self.latest.lock().unwrap_or_else(|e| e.into_inner()))?;
        let max_age = chrono::Duration::from_std(request.maximum_age).ok()?;
        (Utc::now() - latest.timestamp <= max_age).then_some(latest)
    }

    fn unavailable(&self) -> LocationError {
        LocationError::ProviderUnavailable {
            provider: self.name.clone(),
        }
    }
}

fn event_to_result(provider: &str, event: BridgeEvent) -> Result<RawPosition, LocationError> {
    match event {
        BridgeEvent::Position(p) => Ok(p),
        BridgeEvent::PermissionDenied => Err(LocationError::PermissionDenied {
            provider: provider.to_string(),
        }),
        BridgeEvent::Unavailable => Err(LocationError::ProviderUnavailable {
            provider: provider.to_string(),
        }),
        BridgeEvent::Error(msg) => Err(LocationError::InvalidResponse(format!(
            "{}: {}",
            provider, msg
        ))),
    }
}

#[async_trait]
impl PositionProvider for HostBridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> LocationSource {
        self.source
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn current_position(
        &self,
        request: &PositionRequest,
    ) -> Result<RawPosition, LocationError> {
        if !self.is_available() {
            return Err(self.unavailable());
        }
        // Subscribe before looking at the latest reading so nothing published
        // in between is missed.
        let mut rx = self.events.subscribe();
        if let Some(latest) = self.fresh_latest(request) {
            return Ok(latest);
        }
        loop {
            match rx.recv().await {
                Ok(event) => return event_to_result(&self.name, event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(self.unavailable()),
            }
        }
    }

    async fn watch_position(
        &self,
        request: &PositionRequest,
    ) -> Result<PositionWatch, LocationError> {
        if !self.is_available() {
            return Err(self.unavailable());
        }
        let mut rx = self.events.subscribe();
        let (tx, updates) = mpsc::channel(WATCH_BUFFER);

        if let Some(latest) = self.fresh_latest(request) {
            let _ = tx.try_send(Ok(latest));
        }

        let name = self.name.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let hard = matches!(
                            event,
                            BridgeEvent::PermissionDenied | BridgeEvent::Unavailable
                        );
                        if tx.send(event_to_result(&name, event)).await.is_err() || hard {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(provider = %name, skipped, "watch lagged behind host updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.watchers.fetch_add(1, Ordering::SeqCst);
        let watchers = self.watchers.clone();
        let subscription = Subscription::new(self.name.clone(), move || {
            forwarder.abort();
            watchers.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(PositionWatch {
            updates,
            subscription,
        })
    }
}
