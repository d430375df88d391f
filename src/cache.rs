//! Persisted address → coordinate cache.
//!
//! On disk the cache is a single JSON object mapping each normalized address
//! to a two-element array `[lat, lng]`, where both components are decimal
//! strings or `null` when the lookup failed. The file is rewritten wholesale
//! at every checkpoint through a temp file + rename, so a reader never
//! observes a half-written cache.

use std::collections::btree_map::{self, BTreeMap};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to decode cache file {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write cache file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode cache: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to replace cache file {path}: {source}")]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

/// Coordinate pair as stored in the cache.
///
/// Components are kept as strings exactly as the geocoder returned them so a
/// write/reload cycle never loses precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate(
    #[serde(deserialize_with = "component")] Option<String>,
    #[serde(deserialize_with = "component")] Option<String>,
);

impl Coordinate {
    pub fn resolved(lat: impl Into<String>, lng: impl Into<String>) -> Self {
        Self(Some(lat.into()), Some(lng.into()))
    }

    /// Marker for an address that was looked up and could not be resolved.
    pub fn unresolved() -> Self {
        Self(None, None)
    }

    pub fn lat(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn lng(&self) -> Option<&str> {
        self.1.as_deref()
    }

    /// True for the failure marker: a missing component or the literal
    /// `("0", "0")` pair some geocoders return for unknown input.
    pub fn is_sentinel(&self) -> bool {
        match (self.lat(), self.lng()) {
            (Some(lat), Some(lng)) => lat == "0" && lng == "0",
            _ => true,
        }
    }
}

/// Older cache files written by other tools may hold bare JSON numbers.
fn component<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

/// In-memory working copy of the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoCache {
    entries: BTreeMap<String, Coordinate>,
}

impl GeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache from `path`. A missing file yields an empty cache.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No cache at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(CacheError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let cache: GeoCache =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| CacheError::Decode {
                path: path.to_path_buf(),
                source,
            })?;

        info!("Loaded {} cached addresses from {}", cache.len(), path.display());
        Ok(cache)
    }

    /// Write the whole cache to `path`, replacing the previous file atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CacheError> {
        let path = path.as_ref();
        let write_err = |source: std::io::Error| CacheError::Write {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush().map_err(write_err)?;
        }
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|source| CacheError::Persist {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Wrote {} cache entries to {}", self.len(), path.display());
        Ok(())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    pub fn get(&self, address: &str) -> Option<&Coordinate> {
        self.entries.get(address)
    }

    /// Record a resolution. Existing keys are immutable: returns `false` and
    /// leaves the entry alone if `address` is already present.
    pub fn insert(&mut self, address: String, coordinate: Coordinate) -> bool {
        match self.entries.entry(address) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(coordinate);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Coordinate)> {
        self.entries.iter()
    }

    /// Number of entries holding a failure marker.
    pub fn sentinel_count(&self) -> usize {
        self.entries.values().filter(|c| c.is_sentinel()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_coordinate_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dic_geo_master.json");

        let mut cache = GeoCache::new();
        cache.insert(
            "東京都文京区本郷7-3-1".into(),
            Coordinate::resolved("35.712056", "139.762775000001"),
        );
        cache.insert("不明".into(), Coordinate::unresolved());
        cache.save(&path).unwrap();

        let reloaded = GeoCache::load(&path).unwrap();
        assert_eq!(reloaded, cache);
        assert_eq!(
            reloaded.get("東京都文京区本郷7-3-1").unwrap().lng(),
            Some("139.762775000001")
        );
    }

    #[test]
    fn test_on_disk_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = GeoCache::new();
        cache.insert("A".into(), Coordinate::unresolved());
        cache.insert("B".into(), Coordinate::resolved("35.0", "139.0"));
        cache.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"A":[null,null],"B":["35.0","139.0"]}"#);
    }

    #[test]
    fn test_load_accepts_numeric_components() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, r#"{"A":[35.5,139.25],"B":["0","0"],"C":[null,null]}"#).unwrap();

        let cache = GeoCache::load(&path).unwrap();
        assert_eq!(cache.get("A"), Some(&Coordinate::resolved("35.5", "139.25")));
        assert_eq!(cache.sentinel_count(), 2);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = GeoCache::load(dir.path().join("absent.json")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{\"A\": [\"35.0\"").unwrap();

        assert!(matches!(
            GeoCache::load(&path),
            Err(CacheError::Decode { .. })
        ));
    }

    #[test]
    fn test_existing_keys_are_immutable() {
        let mut cache = GeoCache::new();
        assert!(cache.insert("A".into(), Coordinate::unresolved()));
        assert!(!cache.insert("A".into(), Coordinate::resolved("1", "2")));
        assert_eq!(cache.get("A"), Some(&Coordinate::unresolved()));
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(Coordinate::unresolved().is_sentinel());
        assert!(Coordinate::resolved("0", "0").is_sentinel());
        assert!(Coordinate(Some("35.0".into()), None).is_sentinel());
        assert!(!Coordinate::resolved("35.0", "139.0").is_sentinel());
        assert!(!Coordinate::resolved("0", "139.0").is_sentinel());
    }

    #[test]
    fn test_save_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = GeoCache::new();
        cache.insert("A".into(), Coordinate::resolved("1", "2"));
        cache.save(&path).unwrap();
        cache.insert("B".into(), Coordinate::resolved("3", "4"));
        cache.save(&path).unwrap();

        assert_eq!(GeoCache::load(&path).unwrap().len(), 2);
        // Only the cache file remains; the temp file was renamed into place.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
