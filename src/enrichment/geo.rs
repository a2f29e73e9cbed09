// IP geolocation collaborator

use crate::session::Location;
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("geolocation request failed: {0}")]
    Request(String),

    #[error("geolocation lookup rejected: {0}")]
    Rejected(String),
}

/// Trait for IP geolocation providers
#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// `Ok(None)` when the address cannot be placed
    async fn locate(&self, ip: IpAddr) -> Result<Option<Location>, GeoError>;
}

/// Addresses worth sending to a geolocation service
pub fn is_routable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            let unique_local = (v6.segments()[0] & 0xfe00) == 0xfc00;
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

/// Locator that never resolves anything
pub struct NoopLocator;

#[async_trait]
impl GeoLocator for NoopLocator {
    async fn locate(&self, _ip: IpAddr) -> Result<Option<Location>, GeoError> {
        Ok(None)
    }
}

/// ip-api.com style JSON endpoint
pub struct IpApiLocator {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country_code: Option<String>,
    region_name: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl IpApiLocator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeoError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, ip: IpAddr) -> String {
        format!(
            "{}/{}?fields=status,message,countryCode,regionName,city,lat,lon",
            self.endpoint, ip
        )
    }
}

impl IpApiResponse {
    fn into_location(self) -> Result<Option<Location>, GeoError> {
        if self.status != "success" {
            return Err(GeoError::Rejected(
                self.message.unwrap_or_else(|| self.status.clone()),
            ));
        }
        Ok(self.country_code.map(|country| Location {
            country,
            region: self.region_name,
            city: self.city,
            latitude: self.lat,
            longitude: self.lon,
        }))
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn locate(&self, ip: IpAddr) -> Result<Option<Location>, GeoError> {
        let url = self.url_for(ip);
        debug!("Resolving location for {}", ip);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeoError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| GeoError::Request(e.to_string()))?;

        let body: IpApiResponse = response
            .json()
            .await
            .map_err(|e| GeoError::Request(e.to_string()))?;
        body.into_location()
    }
}
