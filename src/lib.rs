//! geomaster - incremental geocoding of crime-incident addresses
//!
//! This library holds the cache, lookup, and publishing pieces used by the
//! `geocode` batch binary.

pub mod address;
pub mod cache;
pub mod config;
pub mod discord;
pub mod geocoder;
pub mod pipeline;
pub mod snapshot;
pub mod source;
pub mod storage;

pub use cache::{Coordinate, GeoCache};
pub use pipeline::{GeocodePipeline, PipelineSettings, ResolveStats};
pub use snapshot::GeoSnapshot;
