// Application configuration
// YAML file located via CONFIG_PATH or the working directory, with selected
// values overridable from the environment.

use crate::enrichment::EnrichmentConfig;
use crate::identity::StaticUser;
use crate::session::SessionConfig;
use crate::sweeper::SweeperConfig;
use crate::token::TokenConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DurableBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FastBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub durable: DurableBackend,
    pub sqlite_path: PathBuf,
    pub fast: FastBackend,
    pub redis_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            durable: DurableBackend::Memory,
            sqlite_path: PathBuf::from("sessions.db"),
            fast: FastBackend::Memory,
            redis_url: "redis://127.0.0.1/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub users: Vec<StaticUser>,
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub token: TokenConfig,
    pub sweeper: SweeperConfig,
    pub enrichment: EnrichmentConfig,
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.session.default_duration_secs <= 0 || self.session.persistent_duration_secs <= 0 {
            return Err("Session durations must be positive".to_string());
        }
        if self.session.fast_tier_max_ttl_secs <= 0 {
            return Err("fast_tier_max_ttl_secs must be positive".to_string());
        }
        if self.session.ended_retention_secs < 0 {
            return Err("ended_retention_secs cannot be negative".to_string());
        }
        if self.token.secret.trim().is_empty() {
            return Err("Token secret cannot be empty".to_string());
        }
        if self.token.access_ttl_secs <= 0 || self.token.refresh_ttl_secs <= 0 {
            return Err("Token TTLs must be positive".to_string());
        }
        if !(self.token.renewal_fraction > 0.0 && self.token.renewal_fraction < 1.0) {
            return Err(format!(
                "renewal_fraction must be between 0 and 1, got {}",
                self.token.renewal_fraction
            ));
        }
        if self.sweeper.interval_secs == 0 || self.sweeper.batch_size == 0 {
            return Err("Sweeper interval and batch size must be positive".to_string());
        }
        if self.enrichment.queue.max_attempts == 0 {
            return Err("Enrichment max_attempts must be at least 1".to_string());
        }

        for user in &self.identity.users {
            if user.password_sha256.len() != 64
                || !user.password_sha256.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(format!(
                    "User '{}' must have a hex sha256 password hash",
                    user.username
                ));
            }
        }

        Ok(())
    }

    /// Apply overrides from `lookup` (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("JWT_SECRET") {
            self.token.secret = secret;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.storage.fast = FastBackend::Redis;
            self.storage.redis_url = url;
        }
        if let Some(path) = lookup("SESSION_DB_PATH") {
            self.storage.durable = DurableBackend::Sqlite;
            self.storage.sqlite_path = PathBuf::from(path);
        }
    }
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, String> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    let config: AppConfig = serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse YAML config: {}", e))?;

    info!(
        "Configuration loaded with {} configured user(s)",
        config.identity.users.len()
    );
    Ok(config)
}

/// Load configuration with fallback options, apply environment overrides
/// and validate the result
pub fn load_config_with_fallback() -> Result<AppConfig, String> {
    let mut config = find_config_file().unwrap_or_else(|| {
        warn!("No configuration file found, using defaults");
        AppConfig::default()
    });

    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn find_config_file() -> Option<AppConfig> {
    // Try loading from environment variable first
    if let Ok(config_path) = std::env::var("CONFIG_PATH") {
        match load_config(&config_path) {
            Ok(config) => return Some(config),
            Err(e) => warn!(
                "Failed to load config from CONFIG_PATH ({}): {}",
                config_path, e
            ),
        }
    }

    for path in ["config.yaml", "config.yml"] {
        if Path::new(path).exists() {
            match load_config(path) {
                Ok(config) => return Some(config),
                Err(e) => warn!("Failed to load config from '{}': {}", path, e),
            }
        }
    }

    None
}
