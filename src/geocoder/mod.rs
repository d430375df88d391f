//! Address lookup providers.
//!
//! A [`Geocoder`] turns one address into one coordinate pair. Rate limiting is
//! the caller's job; providers issue exactly one request per call.

mod geocoding_jp;
mod google;

pub use geocoding_jp::{GeocodingJp, GEOCODING_JP_ENDPOINT};
pub use google::{GoogleGeocoder, GOOGLE_GEOCODE_ENDPOINT};

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::Coordinate;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("geocoder returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("geocoder rejected the request: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("no result for address")]
    NoResult,
    #[error("invalid coordinate {0:?}")]
    InvalidCoordinate(String),
}

impl GeocodeError {
    /// Whether a later attempt could plausibly succeed. Failed lookups are
    /// cached as unresolved either way; this only feeds logging.
    pub fn is_transient(&self) -> bool {
        match self {
            GeocodeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            GeocodeError::Status(status) => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            GeocodeError::Rejected(reason) => {
                reason == "OVER_QUERY_LIMIT" || reason == "UNKNOWN_ERROR"
            }
            GeocodeError::Malformed(_)
            | GeocodeError::NoResult
            | GeocodeError::InvalidCoordinate(_) => false,
        }
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Short provider name used in logs.
    fn id(&self) -> &'static str;

    /// Resolve `address` to a coordinate pair.
    async fn lookup(&self, address: &str) -> Result<Coordinate, GeocodeError>;
}

/// Reject components that do not parse as finite decimals.
fn checked_component(raw: &str) -> Result<String, GeocodeError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(trimmed.to_string()),
        _ => Err(GeocodeError::InvalidCoordinate(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_component() {
        assert_eq!(checked_component(" 35.712056 ").unwrap(), "35.712056");
        assert!(matches!(
            checked_component("abc"),
            Err(GeocodeError::InvalidCoordinate(_))
        ));
        assert!(checked_component("NaN").is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(GeocodeError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(GeocodeError::Status(reqwest::StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!GeocodeError::Status(reqwest::StatusCode::BAD_REQUEST).is_transient());
        assert!(GeocodeError::Rejected("OVER_QUERY_LIMIT".into()).is_transient());
        assert!(!GeocodeError::Rejected("REQUEST_DENIED".into()).is_transient());
        assert!(!GeocodeError::NoResult.is_transient());
    }
}
