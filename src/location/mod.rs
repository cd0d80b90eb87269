//! Location fusion subsystem.
//!
//! Acquires a device position through a prioritized provider chain, keeps
//! the last good fix in a TTL cache, estimates a coarse position from IP
//! services by consensus, tracks continuously, and searches places with a
//! local fallback.

pub mod cache;
pub mod consensus;
pub mod distance;
pub mod geocode;
pub mod http;
pub mod places;
pub mod providers;
pub mod resolver;
pub mod search;
pub mod service;
pub mod tracking;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::FixCache;
pub use consensus::IpConsensus;
pub use distance::distance;
pub use providers::{BridgeEvent, HostBridge, PositionProvider, ProviderChain, RawPosition};
pub use resolver::{AcquireOptions, LocationResolver};
pub use search::SearchEngine;
pub use service::{Collaborators, LocationService};
pub use tracking::{TrackingHandle, TrackingSession, TrackingState};
pub use types::{
    format_coords, Address, Classification, Coordinates, LocationError, LocationFix, LocationSource,
    SearchResult,
};
