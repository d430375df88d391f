//! Google Maps Geocoding API lookup.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{GeocodeError, Geocoder};
use crate::cache::Coordinate;

pub const GOOGLE_GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

pub struct GoogleGeocoder {
    client: Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

impl GoogleGeocoder {
    pub fn new(endpoint: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

fn parse_response(body: &str) -> Result<Coordinate, GeocodeError> {
    let response: GeocodeResponse =
        serde_json::from_str(body).map_err(|e| GeocodeError::Malformed(e.to_string()))?;

    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(GeocodeError::NoResult),
        other => return Err(GeocodeError::Rejected(other.to_string())),
    }

    let first = response.results.first().ok_or(GeocodeError::NoResult)?;
    let Location { lat, lng } = first.geometry.location;
    Ok(Coordinate::resolved(lat.to_string(), lng.to_string()))
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    fn id(&self) -> &'static str {
        "google"
    }

    async fn lookup(&self, address: &str) -> Result<Coordinate, GeocodeError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("address", address),
                ("key", self.api_key.as_str()),
                ("language", "ja"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status()));
        }

        let body = response.text().await?;
        parse_response(&body)
    }
}
