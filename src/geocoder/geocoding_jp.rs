//! geocoding.jp lookup. The API answers with a small XML document:
//!
//! ```text
//! <result>
//!   <address>東京都文京区本郷7-3-1</address>
//!   <coordinate>
//!     <lat>35.712056</lat>
//!     <lng>139.762775</lng>
//!   </coordinate>
//! </result>
//! ```
//!
//! Unknown addresses come back as `<result><error>...</error></result>`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;

use super::{checked_component, GeocodeError, Geocoder};
use crate::cache::Coordinate;

pub const GEOCODING_JP_ENDPOINT: &str = "http://www.geocoding.jp/api/";

pub struct GeocodingJp {
    client: Client,
    endpoint: String,
    lat_re: Regex,
    lng_re: Regex,
    error_re: Regex,
}

impl GeocodingJp {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("geomaster/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            lat_re: Regex::new(r"<lat>\s*([^<]*?)\s*</lat>")?,
            lng_re: Regex::new(r"<lng>\s*([^<]*?)\s*</lng>")?,
            error_re: Regex::new(r"<error>\s*([^<]*?)\s*</error>")?,
        })
    }

    fn parse_response(&self, body: &str) -> Result<Coordinate, GeocodeError> {
        if let Some(caps) = self.error_re.captures(body) {
            debug!("geocoding.jp error element: {}", &caps[1]);
            return Err(GeocodeError::NoResult);
        }

        let lat = self
            .lat_re
            .captures(body)
            .map(|c| c[1].to_string())
            .ok_or_else(|| GeocodeError::Malformed("missing <lat>".into()))?;
        let lng = self
            .lng_re
            .captures(body)
            .map(|c| c[1].to_string())
            .ok_or_else(|| GeocodeError::Malformed("missing <lng>".into()))?;

        Ok(Coordinate::resolved(
            checked_component(&lat)?,
            checked_component(&lng)?,
        ))
    }
}

#[async_trait]
impl Geocoder for GeocodingJp {
    fn id(&self) -> &'static str {
        "geocoding.jp"
    }

    async fn lookup(&self, address: &str) -> Result<Coordinate, GeocodeError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", address)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status()));
        }

        let body = response.text().await?;
        self.parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoder() -> GeocodingJp {
        GeocodingJp::new(GEOCODING_JP_ENDPOINT, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_success() {
        let body = r#"<?xml version="1.0" encoding="UTF-8" ?>
<result>
<version>1.2</version>
<address>東京都文京区本郷7-3-1</address>
<coordinate>
<lat>35.712056</lat>
<lng>139.762775</lng>
<lat_dms>35,42,43.402</lat_dms>
<lng_dms>139,45,45.99</lng_dms>
</coordinate>
</result>"#;

        let coordinate = geocoder().parse_response(body).unwrap();
        assert_eq!(coordinate, Coordinate::resolved("35.712056", "139.762775"));
    }

    #[test]
    fn test_parse_error_element() {
        let body = "<result><error>004</error></result>";
        assert!(matches!(
            geocoder().parse_response(body),
            Err(GeocodeError::NoResult)
        ));
    }

    #[test]
    fn test_parse_missing_fields() {
        let body = "<html><body>Too many requests</body></html>";
        assert!(matches!(
            geocoder().parse_response(body),
            Err(GeocodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_non_numeric() {
        let body = "<result><coordinate><lat>n/a</lat><lng>139.7</lng></coordinate></result>";
        assert!(matches!(
            geocoder().parse_response(body),
            Err(GeocodeError::InvalidCoordinate(_))
        ));
    }
}
