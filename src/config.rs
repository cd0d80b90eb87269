//! Engine configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use crate::location::geocode::NOMINATIM_URL;
use crate::location::http::DEFAULT_USER_AGENT;
use crate::location::providers::ip;
use crate::location::search::{
    DEFAULT_CENTER, DEFAULT_FALLBACK_CAP, DEFAULT_LIMIT, DEFAULT_RADIUS_M,
};
use crate::location::types::{Coordinates, LocationError};
use crate::logging;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// One IP-geolocation service to include in the consensus.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IpProviderConfig {
    pub name: String,
    #[serde(default = "default_ip_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ip_timeout_secs() -> u64 {
    5
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Fix cache file; `None` means ~/.locus/last_fix.json.
    pub cache_path: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    pub precise_threshold_m: f64,
    pub enrichment_timeout_secs: u64,
    /// Skip every network call (enrichment, IP services, remote search).
    pub offline: bool,
    pub user_agent: String,
    pub nominatim_url: String,
    pub search_radius_m: f64,
    pub search_limit: usize,
    pub fallback_cap: usize,
    /// Search center used when the caller has no fix yet.
    pub default_center: Coordinates,
    pub ip_providers: Vec<IpProviderConfig>,
    /// City/country for IP consensus come from this provider when it answers.
    pub preferred_ip_provider: Option<String>,
    pub server_fallback_url: Option<String>,
    pub server_fallback_timeout_secs: u64,
    /// Default `tracing` filter directive; `RUST_LOG` overrides it.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            cache_ttl_secs: 300,
            precise_threshold_m: 20.0,
            enrichment_timeout_secs: 10,
            offline: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            nominatim_url: NOMINATIM_URL.to_string(),
            search_radius_m: DEFAULT_RADIUS_M,
            search_limit: DEFAULT_LIMIT,
            fallback_cap: DEFAULT_FALLBACK_CAP,
            default_center: DEFAULT_CENTER,
            ip_providers: ip::registered_names()
                .map(|name| IpProviderConfig {
                    name: name.to_string(),
                    timeout_secs: default_ip_timeout_secs(),
                })
                .collect(),
            preferred_ip_provider: Some("ipapi.co".to_string()),
            server_fallback_url: None,
            server_fallback_timeout_secs: 8,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, LocationError> {
        let content = fs::read_to_string(path)
            .map_err(|e| LocationError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    /// Like [`load`](Self::load), but falls back to defaults when the file is
    /// missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "using default engine configuration");
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, LocationError> {
        let config: Self =
            toml::from_str(content).map_err(|e| LocationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LocationError> {
        if !(self.precise_threshold_m.is_finite() && self.precise_threshold_m > 0.0) {
            return Err(LocationError::Config(format!(
                "precise_threshold_m must be positive, got {}",
                self.precise_threshold_m
            )));
        }
        if self.cache_ttl_secs == 0 {
            return Err(LocationError::Config("cache_ttl_secs must be positive".into()));
        }
        if !(self.search_radius_m.is_finite() && self.search_radius_m > 0.0) {
            return Err(LocationError::Config("search_radius_m must be positive".into()));
        }
        if self.search_limit == 0 || self.fallback_cap == 0 {
            return Err(LocationError::Config(
                "search_limit and fallback_cap must be at least 1".into(),
            ));
        }
        if !self.default_center.is_valid() {
            return Err(LocationError::Config(format!(
                "default_center out of range: {:?}",
                self.default_center
            )));
        }
        for provider in &self.ip_providers {
            if ip::adapter(&provider.name).is_none() {
                return Err(LocationError::Config(format!(
                    "unknown IP provider '{}'",
                    provider.name
                )));
            }
            if provider.timeout_secs == 0 {
                return Err(LocationError::Config(format!(
                    "{}: timeout_secs must be positive",
                    provider.name
                )));
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment_timeout_secs)
    }

    pub fn server_fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.server_fallback_timeout_secs)
    }

    /// Install logging with [`log_filter`](Self::log_filter) as the default
    /// directive. See [`logging::init_logging`].
    pub fn init_logging(&self, log_dir: Option<&Path>) -> Option<WorkerGuard> {
        logging::init_logging(&self.log_filter, log_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.precise_threshold_m, 20.0);
        assert_eq!(config.search_radius_m, 75_000.0);
        assert_eq!(config.search_limit, 15);
        assert_eq!(config.fallback_cap, 8);
        assert_eq!(config.ip_providers.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            offline = true
            precise_threshold_m = 15.0
            server_fallback_url = "https://api.example.test/ip-location"

            [default_center]
            latitude = 59.3293
            longitude = 18.0686

            [[ip_providers]]
            name = "ipwho.is"
            timeout_secs = 3

            [[ip_providers]]
            name = "ipinfo.io"
            "#,
        )
        .unwrap();
        assert!(config.offline);
        assert_eq!(config.precise_threshold_m, 15.0);
        assert_eq!(config.default_center.latitude, 59.3293);
        assert_eq!(config.ip_providers.len(), 2);
        assert_eq!(config.ip_providers[1].timeout_secs, 5);
        assert_eq!(config.cache_ttl_secs, 300);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err =
            EngineConfig::from_toml_str("[[ip_providers]]\nname = \"geo.example\"\n").unwrap_err();
        assert!(matches!(err, LocationError::Config(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_toml_str("precise_threshold_m = 0.0").is_err());
        assert!(EngineConfig::from_toml_str("fallback_cap = 0").is_err());
        let out_of_range = "[default_center]\nlatitude = 95.0\nlongitude = 0.0";
        assert!(EngineConfig::from_toml_str(out_of_range).is_err());
        assert!(EngineConfig::from_toml_str("offline = \"yes\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locus.toml");
        fs::write(&path, "cache_ttl_secs = 120\n").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap().cache_ttl(), Duration::from_secs(120));

        let missing = dir.path().join("missing.toml");
        assert!(EngineConfig::load(&missing).is_err());
        assert_eq!(EngineConfig::load_or_default(&missing), EngineConfig::default());
    }

    #[test]
    fn test_log_filter_drives_logging() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::from_toml_str("log_filter = \"locus=debug\"\n").unwrap();
        assert_eq!(config.log_filter, "locus=debug");
        let guard = config.init_logging(Some(dir.path()));
        assert!(guard.is_some());
        assert!(EngineConfig::default().init_logging(None).is_none());
    }
}
