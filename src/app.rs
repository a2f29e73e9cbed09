// Service wiring
// Builds the storage tiers, managers and background workers described by an
// `AppConfig`.

use crate::clock::Clock;
use crate::config::{AppConfig, DurableBackend, FastBackend};
use crate::enrichment::{
    EnrichmentHandler, EnrichmentTask, GeoLocator, IpApiLocator, NoopLocator, TaskQueue,
};
use crate::fingerprint::DeviceFingerprintEngine;
use crate::handlers::AppState;
use crate::identity::{IdentityProvider, StaticIdentityProvider};
use crate::session::{
    BroadcastObserver, DurableStore, FastTier, MemoryDurableStore, MemoryFastTier, RedisFastTier,
    SessionEvent, SessionManager, SqliteDurableStore, TracingObserver,
};
use crate::sweeper::LifecycleSweeper;
use crate::token::TokenService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything the binary runs
pub struct Services {
    pub state: AppState,
    pub sweeper: Arc<LifecycleSweeper>,
    pub workers: Vec<JoinHandle<()>>,
    events: Arc<BroadcastObserver>,
}

impl Services {
    /// Lifecycle events for a notification collaborator. Receivers that fall
    /// behind see `RecvError::Lagged` rather than blocking the session path.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

fn durable_tier(config: &AppConfig) -> Result<Arc<dyn DurableStore>, String> {
    match config.storage.durable {
        DurableBackend::Memory => {
            warn!("Using in-memory durable session store; sessions are lost on restart");
            Ok(Arc::new(MemoryDurableStore::new()))
        }
        DurableBackend::Sqlite => {
            let path = &config.storage.sqlite_path;
            info!("Using SQLite durable session store at {}", path.display());
            let store = SqliteDurableStore::open(path)
                .map_err(|e| format!("Failed to open session database: {}", e))?;
            Ok(Arc::new(store))
        }
    }
}

async fn fast_tier(config: &AppConfig, clock: Arc<dyn Clock>) -> Arc<dyn FastTier> {
    match config.storage.fast {
        FastBackend::Memory => Arc::new(MemoryFastTier::new(clock)),
        FastBackend::Redis => match RedisFastTier::connect(&config.storage.redis_url).await {
            Ok(tier) => {
                info!("Using Redis fast session tier");
                Arc::new(tier)
            }
            Err(e) => {
                // The fast tier is a cache; losing it costs latency only
                warn!(
                    "Redis unavailable ({}), falling back to in-process fast tier",
                    e
                );
                Arc::new(MemoryFastTier::new(clock))
            }
        },
    }
}

fn geo_locator(config: &AppConfig) -> Result<Arc<dyn GeoLocator>, String> {
    match &config.enrichment.geo_endpoint {
        Some(endpoint) => {
            let timeout = Duration::from_secs(config.enrichment.geo_timeout_secs.max(1));
            let locator = IpApiLocator::new(endpoint.clone(), timeout)
                .map_err(|e| format!("Failed to build geolocation client: {}", e))?;
            Ok(Arc::new(locator))
        }
        None => Ok(Arc::new(NoopLocator)),
    }
}

/// Build services with the configured backends and identity list
pub async fn build(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Services, String> {
    let identities = Arc::new(StaticIdentityProvider::new(config.identity.users.clone()));
    let durable = durable_tier(config)?;
    let fast = fast_tier(config, clock.clone()).await;
    build_with(config, clock, durable, fast, identities)
}

/// Build services over explicit storage tiers and identity provider
pub fn build_with(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
    durable: Arc<dyn DurableStore>,
    fast: Arc<dyn FastTier>,
    identities: Arc<dyn IdentityProvider>,
) -> Result<Services, String> {
    let engine = Arc::new(DeviceFingerprintEngine::new(
        config.enrichment.fingerprint.clone(),
    ));
    let events = Arc::new(BroadcastObserver::new(EVENT_CHANNEL_CAPACITY));
    let sessions = Arc::new(
        SessionManager::new(durable, fast, engine, clock.clone(), config.session.clone())
            .with_observer(Arc::new(TracingObserver))
            .with_observer(events.clone()),
    );

    let tokens = Arc::new(TokenService::new(
        sessions.clone(),
        identities.clone(),
        config.token.clone(),
        clock,
    ));

    let handler = Arc::new(EnrichmentHandler::new(sessions.clone(), geo_locator(config)?));
    let (enrichment, workers) =
        TaskQueue::<EnrichmentTask>::start(handler, &config.enrichment.queue);

    let sweeper = Arc::new(LifecycleSweeper::new(
        sessions.clone(),
        config.sweeper.clone(),
    ));

    Ok(Services {
        state: AppState {
            sessions,
            tokens,
            identities,
            enrichment,
        },
        sweeper,
        workers,
        events,
    })
}
