use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use tracing::info;

use super::AddressSource;

/// Reads `<dir>/<partition>.csv` (or `.csv.gz`) exports with an `address`
/// column.
#[derive(Debug, Clone)]
pub struct CsvAddressSource {
    dir: PathBuf,
    column: String,
}

impl CsvAddressSource {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            column: "address".to_string(),
        }
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }

    fn partition_file(&self, partition: &str) -> Result<PathBuf> {
        let plain = self.dir.join(format!("{}.csv", partition));
        if plain.exists() {
            return Ok(plain);
        }
        let gz = self.dir.join(format!("{}.csv.gz", partition));
        if gz.exists() {
            return Ok(gz);
        }
        anyhow::bail!(
            "No CSV export for partition {} in {}",
            partition,
            self.dir.display()
        )
    }

    fn read_file(&self, path: &Path) -> Result<Vec<String>> {
        info!("Loading addresses from {}", path.display());

        let file = File::open(path).context("Failed to open address file")?;
        let reader: Box<dyn Read> = if path.extension().map_or(false, |e| e == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let idx = headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == self.column)
            .with_context(|| format!("Column '{}' not found", self.column))?;

        let mut addresses = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            if let Some(address) = record.get(idx) {
                addresses.push(address.to_string());
            }
        }
        Ok(addresses)
    }
}

#[async_trait]
impl AddressSource for CsvAddressSource {
    async fn load_raw(&self, partition: &str) -> Result<Vec<String>> {
        let path = self.partition_file(partition)?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.read_file(&path)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_plain_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hittakuri.csv"),
            "\u{feff}zaimei,address,nendo\n\
             ひったくり,東京都文京区本郷７丁目,2021\n\
             ひったくり,,2021\n\
             ひったくり,東京都文京区本郷7丁目,2022\n\
             ひったくり,東京都台東区上野,2022\n",
        )
        .unwrap();

        let source = CsvAddressSource::new(dir.path());
        assert_eq!(source.load_raw("hittakuri").await.unwrap().len(), 4);

        let addresses = source.load_addresses("hittakuri").await.unwrap();
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains("東京都文京区本郷7丁目"));
    }

    #[tokio::test]
    async fn test_load_gzipped_csv() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("zitensyatou.csv.gz")).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all("address\n大阪府大阪市北区\n".as_bytes()).unwrap();
        encoder.finish().unwrap();

        let addresses = CsvAddressSource::new(dir.path())
            .load_addresses("zitensyatou")
            .await
            .unwrap();
        assert_eq!(addresses.into_iter().collect::<Vec<_>>(), vec!["大阪府大阪市北区"]);
    }

    #[tokio::test]
    async fn test_missing_partition_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvAddressSource::new(dir.path());
        assert!(source.load_raw("buhinnerai").await.is_err());

        std::fs::write(dir.path().join("buhinnerai.csv"), "city\n文京区\n").unwrap();
        assert!(source.load_raw("buhinnerai").await.is_err());
    }
}
