//! Géocodage de code postal
//!
//! Tout échec (réseau, code inconnu, réponse illisible) donne « pas de
//! position », jamais une erreur d'import.

use async_trait::async_trait;
use pollsource::WGS84_SRID;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::Location;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Centroïde du code postal, `None` si inconnu ou en cas d'échec
    async fn geocode(&self, postcode: &str) -> Option<Location>;
}

/// Client HTTP d'une API de codes postaux (`GET {base}/postcodes/{postcode}`)
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PostcodeResponse {
    result: Option<PostcodeResult>,
}

#[derive(Debug, Deserialize)]
struct PostcodeResult {
    longitude: Option<f64>,
    latitude: Option<f64>,
}

impl HttpGeocoder {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, postcode: &str) -> String {
        format!("{}/postcodes/{}", self.base_url, postcode)
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, postcode: &str) -> Option<Location> {
        if postcode.is_empty() {
            return None;
        }

        let url = self.url(postcode);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(postcode = postcode, error = %e, "Geocoder request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(postcode = postcode, status = %response.status(), "Postcode not found");
            return None;
        }

        match response.json::<PostcodeResponse>().await {
            Ok(PostcodeResponse {
                result:
                    Some(PostcodeResult {
                        longitude: Some(lon),
                        latitude: Some(lat),
                    }),
            }) => Some(Location::new(lon, lat, WGS84_SRID)),
            Ok(_) => {
                debug!(postcode = postcode, "Postcode has no coordinates");
                None
            }
            Err(e) => {
                warn!(postcode = postcode, error = %e, "Unreadable geocoder response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let geocoder = HttpGeocoder::new(reqwest::Client::new(), "https://api.postcodes.io/");
        assert_eq!(geocoder.url("AB12CD"), "https://api.postcodes.io/postcodes/AB12CD");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"status": 200, "result": {"postcode": "SW1A 1AA", "longitude": -0.141588, "latitude": 51.501009}}"#;
        let parsed: PostcodeResponse = serde_json::from_str(body).unwrap();
        let result = parsed.result.unwrap();
        assert_eq!(result.longitude, Some(-0.141588));

        let terminated = r#"{"status": 200, "result": {"longitude": null, "latitude": null}}"#;
        let parsed: PostcodeResponse = serde_json::from_str(terminated).unwrap();
        assert!(parsed.result.unwrap().latitude.is_none());
    }

    #[tokio::test]
    async fn test_failure_means_no_location() {
        let geocoder = HttpGeocoder::new(reqwest::Client::new(), "http://127.0.0.1:9");
        assert_eq!(geocoder.geocode("AB12CD").await, None);
        assert_eq!(geocoder.geocode("").await, None);
    }
}
