//! Publishable projection of the geocode cache.
//!
//! The snapshot drops every failure marker and writes the rest as a flat
//! Parquet table `(address: Utf8, lat: Float64, lng: Float64)`.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::GeoCache;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoSnapshot {
    pub rows: Vec<SnapshotRow>,
    /// Entries that were neither sentinels nor parseable coordinates.
    pub skipped: usize,
}

impl GeoSnapshot {
    /// Derive the snapshot from the cache. Sentinel entries are excluded;
    /// entries with unparseable coordinates are skipped with a warning.
    pub fn from_cache(cache: &GeoCache) -> Self {
        let mut snapshot = GeoSnapshot::default();

        for (address, coordinate) in cache.iter() {
            if coordinate.is_sentinel() {
                continue;
            }
            let (Some(lat), Some(lng)) = (coordinate.lat(), coordinate.lng()) else {
                continue;
            };

            match (lat.trim().parse::<f64>(), lng.trim().parse::<f64>()) {
                (Ok(lat), Ok(lng)) if lat.is_finite() && lng.is_finite() => {
                    // "0.0" etc. are the zero pair in another spelling
                    if lat == 0.0 && lng == 0.0 {
                        continue;
                    }
                    snapshot.rows.push(SnapshotRow {
                        address: address.clone(),
                        lat,
                        lng,
                    });
                }
                _ => {
                    warn!(
                        "Skipping malformed coordinate for {}: [{:?}, {:?}]",
                        address, lat, lng
                    );
                    snapshot.skipped += 1;
                }
            }
        }

        snapshot
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("address", DataType::Utf8, false),
            Field::new("lat", DataType::Float64, false),
            Field::new("lng", DataType::Float64, false),
        ]))
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch, SnapshotError> {
        let addresses =
            StringArray::from(self.rows.iter().map(|r| r.address.as_str()).collect::<Vec<_>>());
        let lats = Float64Array::from(self.rows.iter().map(|r| r.lat).collect::<Vec<_>>());
        let lngs = Float64Array::from(self.rows.iter().map(|r| r.lng).collect::<Vec<_>>());

        let batch = RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(addresses) as ArrayRef,
                Arc::new(lats) as ArrayRef,
                Arc::new(lngs) as ArrayRef,
            ],
        )?;
        Ok(batch)
    }

    /// Write the snapshot as a Snappy-compressed Parquet file, replacing any
    /// existing file at `path`.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let batch = self.to_record_batch()?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, Self::schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        debug!("Wrote {} snapshot rows to {}", self.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Coordinate;
    use arrow::array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn sample_cache() -> GeoCache {
        let mut cache = GeoCache::new();
        cache.insert("A".into(), Coordinate::unresolved());
        cache.insert("B".into(), Coordinate::resolved("35.0", "139.0"));
        cache.insert("C".into(), Coordinate::resolved("0", "0"));
        cache
    }

    #[test]
    fn test_sentinels_excluded() {
        let snapshot = GeoSnapshot::from_cache(&sample_cache());
        assert_eq!(
            snapshot.rows,
            vec![SnapshotRow {
                address: "B".into(),
                lat: 35.0,
                lng: 139.0,
            }]
        );
        assert_eq!(snapshot.skipped, 0);
    }

    #[test]
    fn test_zero_pair_spellings_excluded() {
        let mut cache = GeoCache::new();
        cache.insert("Z".into(), Coordinate::resolved("0.0", "0.000"));
        assert!(GeoSnapshot::from_cache(&cache).is_empty());
    }

    #[test]
    fn test_malformed_rows_skipped() {
        let mut cache = sample_cache();
        cache.insert("D".into(), Coordinate::resolved("north", "139.0"));
        let snapshot = GeoSnapshot::from_cache(&cache);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.skipped, 1);
    }

    #[test]
    fn test_parquet_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output").join("geo_master.parquet");

        let mut cache = sample_cache();
        cache.insert("E".into(), Coordinate::resolved("34.5", "135.5"));
        GeoSnapshot::from_cache(&cache).write_parquet(&path).unwrap();

        let file = File::open(&path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        let schema = batch.schema();
        let columns: Vec<(&str, &DataType)> = schema
            .fields()
            .iter()
            .map(|f| (f.name().as_str(), f.data_type()))
            .collect();
        assert_eq!(
            columns,
            vec![
                ("address", &DataType::Utf8),
                ("lat", &DataType::Float64),
                ("lng", &DataType::Float64),
            ]
        );
        assert_eq!(batch.num_rows(), 2);

        let addresses = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let lats = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(addresses.value(0), "B");
        assert_eq!(addresses.value(1), "E");
        assert_eq!(lats.value(1), 34.5);
        assert_eq!(lats.null_count(), 0);
    }

    #[test]
    fn test_empty_snapshot_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_master.parquet");
        GeoSnapshot::default().write_parquet(&path).unwrap();
        assert!(path.exists());
    }
}
