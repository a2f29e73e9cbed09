// Background session enrichment: fingerprint refinement, geolocation and
// user agent parsing, executed by a retrying in-process task queue

pub mod geo;
pub mod queue;
pub mod tasks;

pub use geo::{GeoLocator, IpApiLocator, NoopLocator};
pub use queue::{QueueConfig, TaskError, TaskHandler, TaskQueue};
pub use tasks::{EnrichmentHandler, EnrichmentTask};

use crate::fingerprint::FingerprintConfig;
use serde::{Deserialize, Serialize};

/// Enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub queue: QueueConfig,
    pub fingerprint: FingerprintConfig,
    /// ip-api compatible endpoint; geolocation is disabled when unset
    pub geo_endpoint: Option<String>,
    pub geo_timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            fingerprint: FingerprintConfig::default(),
            geo_endpoint: None,
            geo_timeout_secs: 3,
        }
    }
}
