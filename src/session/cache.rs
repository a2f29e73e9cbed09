// Fast session tier and the cache-aside layer over both tiers
//
// Staleness bound: a fast-tier copy never lives longer than
// `fast_tier_max_ttl_secs` (and never past the session's own expiry), so a
// counter or a cross-process invalidation is visible everywhere within that
// window. Same-process invalidation rewrites the fast tier before returning.

use super::error::StoreError;
use super::storage::DurableStore;
use super::types::{EndResult, Session, SessionConfig};
use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Trait for TTL-indexed session caches
#[async_trait]
pub trait FastTier: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Store a copy that disappears after `ttl`
    async fn put(&self, session: &Session, ttl: Duration) -> Result<(), StoreError>;

    async fn remove(&self, session_id: &str) -> Result<(), StoreError>;

    /// Drop ended entries whose `ended_at` is before `cutoff`
    async fn evict_ended_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
struct CachedSession {
    session: Session,
    deadline: DateTime<Utc>,
}

/// In-process fast tier
pub struct MemoryFastTier {
    entries: Arc<RwLock<HashMap<String, CachedSession>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryFastTier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.deadline > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl FastTier for MemoryFastTier {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(session_id)
            .filter(|entry| entry.deadline > now)
            .map(|entry| entry.session.clone()))
    }

    async fn put(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let deadline = self.clock.now() + ttl;
        let mut entries = self.entries.write().await;
        entries.insert(
            session.session_id.clone(),
            CachedSession {
                session: session.clone(),
                deadline,
            },
        );
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(session_id);
        Ok(())
    }

    async fn evict_ended_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();

        entries.retain(|_, entry| {
            let stale_ended = entry.session.is_ended
                && entry.session.ended_at.is_some_and(|ended| ended < cutoff);
            !stale_ended && entry.deadline > now
        });

        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("Evicted {} fast-tier session entries", evicted);
        }
        Ok(evicted)
    }
}

/// Durable mutation results that carry the post-mutation record
pub trait MutationOutcome {
    fn record(&self) -> Option<&Session>;
}

impl MutationOutcome for Option<Session> {
    fn record(&self) -> Option<&Session> {
        self.as_ref()
    }
}

impl MutationOutcome for EndResult {
    fn record(&self) -> Option<&Session> {
        match self {
            EndResult::Ended(session) | EndResult::AlreadyEnded(session) => Some(session),
            EndResult::NotFound => None,
        }
    }
}

/// Cache-aside access to both tiers. The durable tier is authoritative; the
/// fast tier is best-effort and its failures only ever cost latency.
pub struct SessionCache {
    durable: Arc<dyn DurableStore>,
    fast: Arc<dyn FastTier>,
    clock: Arc<dyn Clock>,
    max_ttl: Duration,
    ended_retention: Duration,
}

impl SessionCache {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        fast: Arc<dyn FastTier>,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            durable,
            fast,
            clock,
            max_ttl: Duration::seconds(config.fast_tier_max_ttl_secs.max(1)),
            ended_retention: config.ended_retention(),
        }
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    /// Fast tier first. An entry flagged ended is never trusted; a miss, an
    /// ended entry or a fast-tier failure falls through to the durable tier,
    /// and a live durable hit is copied back into the fast tier.
    pub async fn read_through(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        match self.fast.get(session_id).await {
            Ok(Some(session)) if !session.is_ended => return Ok(Some(session)),
            Ok(_) => {}
            Err(e) => warn!("Fast tier read failed for {}: {}", session_id, e),
        }

        let record = self.durable.get(session_id).await?;
        if let Some(session) = &record
            && session.is_valid_at(self.clock.now())
        {
            self.mirror(session).await;
        }
        Ok(record)
    }

    /// Apply a durable mutation, then bring the fast tier in line with the
    /// record it produced. A durable failure leaves the fast tier untouched.
    pub async fn write_both<T, F, Fut>(&self, mutate: F) -> Result<T, StoreError>
    where
        T: MutationOutcome,
        F: FnOnce(Arc<dyn DurableStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let outcome = mutate(self.durable.clone()).await?;
        if let Some(session) = outcome.record() {
            self.mirror(session).await;
        }
        Ok(outcome)
    }

    /// Write the fast-tier copy matching a durable record. Live sessions are
    /// cached until expiry (capped by the staleness bound), ended sessions for
    /// the remainder of the retention window.
    ///
    /// Ending is terminal, so a live copy may never outlast an end that raced
    /// with it: after writing a live copy the durable state is read again and
    /// an ended record replaces the copy.
    pub async fn mirror(&self, session: &Session) {
        let now = self.clock.now();
        let result = match self.ttl_for(session, now) {
            Some(ttl) => self.fast.put(session, ttl).await,
            None => self.fast.remove(&session.session_id).await,
        };

        if let Err(e) = result {
            error!(
                "Fast tier write failed for session {}: {}",
                session.session_id, e
            );
            return;
        }

        if !session.is_ended && self.ttl_for(session, now).is_some() {
            self.settle_live_copy(&session.session_id).await;
        }
    }

    async fn settle_live_copy(&self, session_id: &str) {
        let result = match self.durable.get(session_id).await {
            Ok(Some(current)) if current.is_ended => {
                debug!("Session {} ended while caching, replacing live copy", session_id);
                match self.ttl_for(&current, self.clock.now()) {
                    Some(ttl) => self.fast.put(&current, ttl).await,
                    None => self.fast.remove(session_id).await,
                }
            }
            Ok(Some(_)) => Ok(()),
            Ok(None) => self.fast.remove(session_id).await,
            Err(e) => {
                warn!("Could not confirm cached session {}: {}", session_id, e);
                self.fast.remove(session_id).await
            }
        };

        if let Err(e) = result {
            error!("Fast tier repair failed for session {}: {}", session_id, e);
        }
    }

    pub async fn evict_ended_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.fast.evict_ended_before(cutoff).await
    }

    fn ttl_for(&self, session: &Session, now: DateTime<Utc>) -> Option<Duration> {
        if session.is_ended {
            let ended_at = session.ended_at.unwrap_or(now);
            let left = self.ended_retention - (now - ended_at);
            return (left > Duration::zero()).then_some(left);
        }

        if session.is_valid_at(now) {
            Some(session.remaining(now).min(self.max_ttl))
        } else {
            None
        }
    }
}
