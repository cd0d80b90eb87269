//! Locus, a location fusion and tracking engine.
//!
//! Entry point is [`location::LocationService`], built from an
//! [`config::EngineConfig`] and a set of [`location::Collaborators`].

pub mod config;
pub mod location;
pub mod logging;

pub use config::EngineConfig;
pub use location::{AcquireOptions, LocationError, LocationFix, LocationService};
