//! Job configuration.
//!
//! Every field has a default, so the job runs without a config file. A TOML
//! file can override any subset:
//!
//! ```toml
//! partitions = ["hittakuri", "zitensyatou"]
//!
//! [global]
//! cache_path = "dic_geo_master.json"
//! request_delay_secs = 8.0
//! checkpoint_every = 10
//!
//! [geocoder]
//! provider = "google"
//!
//! [source]
//! kind = "csv"
//! dir = "./exports"
//!
//! [storage.backend]
//! kind = "local"
//! root = "./bucket"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::geocoder::{GEOCODING_JP_ENDPOINT, GOOGLE_GEOCODE_ENDPOINT};
use crate::source::BIGQUERY_ENDPOINT;
use crate::storage::GCS_ENDPOINT;

pub const DEFAULT_PARTITIONS: [&str; 7] = [
    "hittakuri",
    "zitensyatou",
    "syajyounerai",
    "buhinnerai",
    "zihankinerai",
    "zidousyatou",
    "ootobaitou",
];

const DEFAULT_PROJECT: &str = "crimes-porttal";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub geocoder: GeocoderConfig,
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub partitions: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    pub cache_path: PathBuf,
    /// Local scratch file the snapshot is written to before upload.
    pub snapshot_path: PathBuf,
    pub request_delay_secs: f64,
    pub request_timeout_secs: u64,
    pub checkpoint_every: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeocoderProvider {
    GeocodingJp,
    Google,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocoderConfig {
    pub provider: GeocoderProvider,
    pub endpoint: Option<String>,
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Csv {
        dir: PathBuf,
        #[serde(default = "default_address_column")]
        column: String,
    },
    Bigquery {
        #[serde(default = "default_project")]
        project: String,
        #[serde(default = "default_table")]
        table: String,
        #[serde(default = "default_partition_column")]
        partition_column: String,
        #[serde(default = "default_bigquery_endpoint")]
        endpoint: String,
        #[serde(default = "default_token_env")]
        access_token_env: String,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    /// Fixed object path; every publish overwrites it.
    pub object: String,
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    Gcs {
        #[serde(default = "default_project")]
        project: String,
        #[serde(default = "default_gcs_endpoint")]
        endpoint: String,
        #[serde(default = "default_token_env")]
        access_token_env: String,
        #[serde(default)]
        dry_run: bool,
    },
    Local {
        root: PathBuf,
    },
}

fn default_address_column() -> String {
    "address".to_string()
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

fn default_table() -> String {
    format!("{}.portal_dataset.crimes", DEFAULT_PROJECT)
}

fn default_partition_column() -> String {
    "teguchi_en".to_string()
}

fn default_bigquery_endpoint() -> String {
    BIGQUERY_ENDPOINT.to_string()
}

fn default_gcs_endpoint() -> String {
    GCS_ENDPOINT.to_string()
}

fn default_token_env() -> String {
    "GCP_ACCESS_TOKEN".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            geocoder: GeocoderConfig::default(),
            source: SourceConfig::default(),
            storage: StorageConfig::default(),
            partitions: DEFAULT_PARTITIONS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("dic_geo_master.json"),
            snapshot_path: PathBuf::from("./output/geo_master.parquet"),
            request_delay_secs: 8.0,
            request_timeout_secs: 30,
            checkpoint_every: 10,
        }
    }
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            provider: GeocoderProvider::GeocodingJp,
            endpoint: None,
            api_key_env: "GOOGLE_MAPS_API_KEY".to_string(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Bigquery {
            project: default_project(),
            table: default_table(),
            partition_column: default_partition_column(),
            endpoint: default_bigquery_endpoint(),
            access_token_env: default_token_env(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "geo_master".to_string(),
            object: "geo_master.parquet".to_string(),
            backend: StorageBackend::default(),
        }
    }
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Gcs {
            project: default_project(),
            endpoint: default_gcs_endpoint(),
            access_token_env: default_token_env(),
            dry_run: false,
        }
    }
}

impl GlobalConfig {
    /// Fails for negative, non-finite or overflowing values.
    pub fn request_delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.request_delay_secs).with_context(|| {
            format!("Invalid request_delay_secs: {}", self.request_delay_secs)
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl GeocoderConfig {
    pub fn endpoint(&self) -> &str {
        match (&self.endpoint, self.provider) {
            (Some(endpoint), _) => endpoint,
            (None, GeocoderProvider::GeocodingJp) => GEOCODING_JP_ENDPOINT,
            (None, GeocoderProvider::Google) => GOOGLE_GEOCODE_ENDPOINT,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.global.checkpoint_every > 0,
            "checkpoint_every must be at least 1"
        );
        self.global.request_delay()?;
        anyhow::ensure!(!self.partitions.is_empty(), "No partitions configured");
        anyhow::ensure!(!self.storage.bucket.is_empty(), "Storage bucket is empty");
        anyhow::ensure!(!self.storage.object.is_empty(), "Storage object is empty");

        Url::parse(self.geocoder.endpoint()).context("Invalid geocoder endpoint")?;
        if let SourceConfig::Bigquery { endpoint, .. } = &self.source {
            Url::parse(endpoint).context("Invalid BigQuery endpoint")?;
        }
        if let StorageBackend::Gcs { endpoint, .. } = &self.storage.backend {
            Url::parse(endpoint).context("Invalid GCS endpoint")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_batch_job() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.partitions.len(), 7);
        assert_eq!(config.partitions[0], "hittakuri");
        assert_eq!(config.global.request_delay().unwrap(), Duration::from_secs(8));
        assert_eq!(config.global.checkpoint_every, 10);
        assert_eq!(config.storage.bucket, "geo_master");
        assert_eq!(config.storage.object, "geo_master.parquet");
        assert_eq!(config.geocoder.endpoint(), GEOCODING_JP_ENDPOINT);
        assert!(matches!(config.source, SourceConfig::Bigquery { .. }));
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
            partitions = ["hittakuri"]

            [global]
            request_delay_secs = 0.5

            [geocoder]
            provider = "google"

            [source]
            kind = "csv"
            dir = "./exports"

            [storage.backend]
            kind = "local"
            root = "./bucket"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.partitions, vec!["hittakuri"]);
        assert_eq!(config.global.request_delay().unwrap(), Duration::from_millis(500));
        assert_eq!(config.global.checkpoint_every, 10);
        assert_eq!(config.geocoder.provider, GeocoderProvider::Google);
        assert_eq!(config.geocoder.endpoint(), GOOGLE_GEOCODE_ENDPOINT);
        match &config.source {
            SourceConfig::Csv { dir, column } => {
                assert_eq!(dir, &PathBuf::from("./exports"));
                assert_eq!(column, "address");
            }
            other => panic!("unexpected source {:?}", other),
        }
        assert!(matches!(config.storage.backend, StorageBackend::Local { .. }));
        assert_eq!(config.storage.bucket, "geo_master");
    }

    #[test]
    fn test_validation_rejects_zero_cadence() {
        let mut config = Config::default();
        config.global.checkpoint_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_delays() {
        for delay in [1e30, -1.0, f64::NAN, f64::INFINITY] {
            let mut config = Config::default();
            config.global.request_delay_secs = delay;
            assert!(config.validate().is_err(), "accepted {}", delay);
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode.toml");
        fs::write(&path, "[global]\ncheckpoint_every = 5\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.global.checkpoint_every, 5);
        assert_eq!(config.partitions.len(), 7);
    }
}
