//! Geocode batch job.
//!
//! Walks every configured crime-category partition, resolves addresses the
//! cache has not seen yet, and keeps the published `geo_master` snapshot up
//! to date as it goes.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use geomaster::config::{Config, GeocoderProvider, SourceConfig, StorageBackend};
use geomaster::discord::DiscordWebhook;
use geomaster::geocoder::{Geocoder, GeocodingJp, GoogleGeocoder};
use geomaster::source::{AddressSource, BigQuerySource, CsvAddressSource};
use geomaster::storage::{GcsClient, LocalDirSink, StorageSink};
use geomaster::{GeoCache, GeocodePipeline, PipelineSettings};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "geocode")]
#[command(about = "Geocode crime-incident addresses and publish the geo_master snapshot")]
struct Args {
    /// TOML config; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discord webhook URL for notifications (optional)
    #[arg(long)]
    discord_webhook: Option<String>,
}

fn env_secret(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("Environment variable {} is not set", name))
}

fn build_geocoder(config: &Config) -> Result<Arc<dyn Geocoder>> {
    let timeout = config.global.request_timeout();
    let endpoint = config.geocoder.endpoint();
    let geocoder: Arc<dyn Geocoder> = match config.geocoder.provider {
        GeocoderProvider::GeocodingJp => Arc::new(GeocodingJp::new(endpoint, timeout)?),
        GeocoderProvider::Google => {
            let key = env_secret(&config.geocoder.api_key_env)?;
            Arc::new(GoogleGeocoder::new(endpoint, key, timeout)?)
        }
    };
    Ok(geocoder)
}

fn build_source(config: &Config) -> Result<Box<dyn AddressSource>> {
    let source: Box<dyn AddressSource> = match &config.source {
        SourceConfig::Csv { dir, column } => {
            Box::new(CsvAddressSource::new(dir.clone()).with_column(column))
        }
        SourceConfig::Bigquery {
            project,
            table,
            partition_column,
            endpoint,
            access_token_env,
        } => Box::new(BigQuerySource::new(
            endpoint,
            project,
            table,
            partition_column,
            env_secret(access_token_env)?,
        )?),
    };
    Ok(source)
}

fn build_sink(config: &Config) -> Result<Arc<dyn StorageSink>> {
    let sink: Arc<dyn StorageSink> = match &config.storage.backend {
        StorageBackend::Gcs {
            project,
            endpoint,
            access_token_env,
            dry_run,
        } => Arc::new(GcsClient::new(
            endpoint,
            project,
            env_secret(access_token_env)?,
            *dry_run,
        )?),
        StorageBackend::Local { root } => Arc::new(LocalDirSink::new(root.clone())),
    };
    Ok(sink)
}

async fn run(config: Config, discord: Option<&DiscordWebhook>) -> Result<()> {
    let geocoder = build_geocoder(&config)?;
    let source = build_source(&config)?;
    let sink = build_sink(&config)?;

    sink.ensure_bucket(&config.storage.bucket)
        .await
        .context("Failed to prepare snapshot bucket")?;

    let settings = PipelineSettings::from_config(&config)?;
    let pipeline = GeocodePipeline::new(geocoder.clone(), sink, settings).with_progress(true);

    let mut cache = GeoCache::load(&config.global.cache_path)?;
    info!(
        "Starting with {} cached addresses ({} unresolved), geocoder: {}",
        cache.len(),
        cache.sentinel_count(),
        geocoder.id()
    );

    for partition in &config.partitions {
        let report = pipeline
            .run_partition(source.as_ref(), partition, &mut cache)
            .await?;

        if let Some(dw) = discord {
            let _ = dw.partition_done(&report).await;
        }
    }

    info!(
        "All partitions done: {} cached addresses ({} unresolved)",
        cache.len(),
        cache.sentinel_count()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            info!("Config: {}", path.display());
            Config::load_from_file(path)?
        }
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    info!("geo_master geocoding job");
    info!("Partitions: {}", config.partitions.join(", "));

    let discord = args.discord_webhook.clone().map(DiscordWebhook::new);

    if let Some(ref dw) = discord {
        let _ = dw
            .send(
                "Geocoding Started",
                &format!("Processing **{}** partitions", config.partitions.len()),
                true,
            )
            .await;
    }

    let result = run(config, discord.as_ref()).await;

    if let Some(ref dw) = discord {
        let (title, description, success) = match &result {
            Ok(()) => ("Geocoding Complete", "All partitions processed.".to_string(), true),
            Err(e) => ("Geocoding Failed", format!("{:#}", e), false),
        };
        let _ = dw.send(title, &description, success).await;
    }

    if let Err(ref e) = result {
        error!("Geocoding failed: {:#}", e);
    }
    result
}
