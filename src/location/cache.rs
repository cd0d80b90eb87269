//! Single-slot cache for the last good fix, persisted at ~/.locus/last_fix.json.
//!
//! TTL: 300 seconds, checked when the slot is read. Nothing is evicted in the
//! background; an expired entry simply stops being returned by [`FixCache::get`].
//! Last writer wins.

use super::types::{LocationFix, LocationSource};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_TTL_SECS: i64 = 300;

/// The stored fix plus the instant it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fix: LocationFix,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.stored_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) > ttl
    }
}

/// The fix cache. `path == None` keeps the slot in memory only.
#[derive(Debug)]
pub struct FixCache {
    path: Option<PathBuf>,
    ttl: Duration,
    entry: Option<CacheEntry>,
}

impl FixCache {
    /// Load the cache from the default location (~/.locus/last_fix.json).
    pub fn load() -> Self {
        Self::load_from(Self::default_path())
    }

    /// Load the cache from a specific file. A missing or unreadable file
    /// yields an empty slot.
    pub fn load_from(path: PathBuf) -> Self {
        let entry = Self::read_file(&path);
        Self {
            path: Some(path),
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            entry,
        }
    }

    /// A cache that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            entry: None,
        }
    }

    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(DEFAULT_TTL_SECS));
        self
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".locus")
            .join("last_fix.json")
    }

    fn read_file(path: &Path) -> Option<CacheEntry> {
        let data = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&data) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable fix cache");
                None
            }
        }
    }

    /// The cached fix, tagged as coming from the cache, if it has not expired.
    pub fn get(&self) -> Option<LocationFix> {
        self.get_at(Utc::now())
    }

    pub fn get_at(&self, now: DateTime<Utc>) -> Option<LocationFix> {
        let entry = self.entry.as_ref()?;
        if entry.is_expired(now, self.ttl) {
            debug!(age_secs = entry.age(now).num_seconds(), "cached fix expired");
            return None;
        }
        Some(entry.fix.clone().with_source(LocationSource::Cache))
    }

    /// The last stored fix regardless of age.
    pub fn last_known(&self) -> Option<LocationFix> {
        self.entry
            .as_ref()
            .map(|e| e.fix.clone().with_source(LocationSource::Cache))
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    /// Overwrite the slot and persist it.
    pub fn put(&mut self, fix: &LocationFix) {
        self.put_at(fix, Utc::now());
    }

    pub fn put_at(&mut self, fix: &LocationFix, now: DateTime<Utc>) {
        self.entry = Some(CacheEntry {
            fix: fix.clone(),
            stored_at: now,
        });
        self.persist();
    }

    pub fn clear(&mut self) {
        self.entry = None;
        if let Some(path) = &self.path {
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "could not remove fix cache");
                }
            }
        }
    }

    fn persist(&self) {
        let (Some(path), Some(entry)) = (&self.path, &self.entry) else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let written = serde_json::to_string_pretty(entry)
            .map_err(super::types::LocationError::from)
            .and_then(|json| fs::write(path, json).map_err(Into::into));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "could not persist fix cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::types::{Classification, Coordinates};
    use tempfile::TempDir;

    fn test_cache() -> (FixCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_fix.json");
        (FixCache::load_from(path), dir)
    }

    fn gombe_fix() -> LocationFix {
        let coords = Coordinates::new(-4.3033, 15.3105).unwrap();
        LocationFix::new(coords, 12.0, LocationSource::Native, 20.0).unwrap()
    }

    #[test]
    fn test_cache_put_get() {
        let (mut cache, _dir) = test_cache();
        cache.put(&gombe_fix());

        let result = cache.get().unwrap();
        assert_eq!(result.source(), LocationSource::Cache);
        assert_eq!(result.classification(), Classification::Precise);
        assert!((result.latitude() + 4.3033).abs() < 1e-9);
        assert_eq!(result.confidence(), gombe_fix().confidence());
    }

    #[test]
    fn test_ttl_boundary() {
        let (mut cache, _dir) = test_cache();
        let t0 = Utc::now();
        cache.put_at(&gombe_fix(), t0);

        assert!(cache.get_at(t0 + Duration::seconds(299)).is_some());
        assert!(cache.get_at(t0 + Duration::seconds(300)).is_some());
        assert!(cache.get_at(t0 + Duration::seconds(301)).is_none());
    }

    #[test]
    fn test_last_known_ignores_ttl() {
        let (mut cache, _dir) = test_cache();
        let t0 = Utc::now() - Duration::hours(2);
        cache.put_at(&gombe_fix(), t0);

        assert!(cache.get().is_none());
        let stale = cache.last_known().unwrap();
        assert_eq!(stale.source(), LocationSource::Cache);
    }

    #[test]
    fn test_cache_miss() {
        let (cache, _dir) = test_cache();
        assert!(cache.get().is_none());
        assert!(cache.last_known().is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let (mut cache, _dir) = test_cache();
        cache.put(&gombe_fix());
        let ndjili = LocationFix::new(
            Coordinates::new(-4.3858, 15.4446).unwrap(),
            8.0,
            LocationSource::Browser,
            20.0,
        )
        .unwrap();
        cache.put(&ndjili);
        assert!((cache.get().unwrap().longitude() - 15.4446).abs() < 1e-9);
    }

    #[test]
    fn test_cache_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("last_fix.json");
        let t0 = Utc::now();

        {
            let mut cache = FixCache::load_from(path.clone());
            cache.put_at(&gombe_fix(), t0);
        }

        let reloaded = FixCache::load_from(path);
        let entry = reloaded.entry().unwrap();
        assert_eq!(entry.stored_at, t0);
        assert!(reloaded.get_at(t0 + Duration::seconds(10)).is_some());
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_fix.json");
        fs::write(&path, "{ not json").unwrap();

        let cache = FixCache::load_from(path);
        assert!(cache.entry().is_none());
    }

    #[test]
    fn test_clear_removes_file() {
        let (mut cache, dir) = test_cache();
        cache.put(&gombe_fix());
        assert!(dir.path().join("last_fix.json").exists());

        cache.clear();
        assert!(cache.get().is_none());
        assert!(!dir.path().join("last_fix.json").exists());
    }

    #[test]
    fn test_in_memory_and_custom_ttl() {
        let mut cache = FixCache::in_memory().with_ttl(std::time::Duration::from_secs(10));
        let t0 = Utc::now();
        cache.put_at(&gombe_fix(), t0);
        assert!(cache.get_at(t0 + Duration::seconds(9)).is_some());
        assert!(cache.get_at(t0 + Duration::seconds(11)).is_none());
    }
}
