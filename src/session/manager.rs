// Session manager for high-level session operations
// Owns consistency between the durable and fast tiers: every mutation goes
// through `SessionCache::write_both`, every read through `read_through`.

use super::cache::{FastTier, SessionCache};
use super::error::{SessionError, StoreError};
use super::events::{SessionEvent, SessionObserver};
use super::storage::DurableStore;
use super::types::{
    DeviceInfo, EndResult, ExpiryUpdate, Location, ScoredFingerprint, Session, SessionConfig,
    SessionContext,
};
use crate::clock::Clock;
use crate::fingerprint::DeviceFingerprintEngine;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Termination reason written by the sweeper
pub const REASON_EXPIRED: &str = "expired";
/// Termination reason for owner deletion/suspension
pub const REASON_OWNER_REVOKED: &str = "owner_revoked";
/// Termination reason for explicit logout
pub const REASON_LOGOUT: &str = "logout";

const EXPIRED_SCAN_BATCH: usize = 500;

/// Result of one expiry batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiredBatch {
    /// Expired live sessions the scan returned
    pub found: usize,
    /// Sessions this call actually ended
    pub ended: usize,
}

/// Session manager for handling session lifecycle and operations
pub struct SessionManager {
    cache: SessionCache,
    engine: Arc<DeviceFingerprintEngine>,
    observers: Vec<Arc<dyn SessionObserver>>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        durable: Arc<dyn DurableStore>,
        fast: Arc<dyn FastTier>,
        engine: Arc<DeviceFingerprintEngine>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            cache: SessionCache::new(durable, fast, clock.clone(), &config),
            engine,
            observers: Vec::new(),
            clock,
            config,
        }
    }

    /// Register an observer for lifecycle events
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &DeviceFingerprintEngine {
        &self.engine
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a session for an authenticated owner. Only the cheap
    /// fingerprint is computed here; device, location and enhanced
    /// fingerprint arrive later through enrichment.
    pub async fn create_session(
        &self,
        owner_ref: &str,
        context: &SessionContext,
    ) -> Result<Session, SessionError> {
        let now = self.clock.now();
        let fast_fingerprint = self.engine.compute_fast(context);
        let session = Session::new(
            owner_ref.to_string(),
            context,
            fast_fingerprint,
            now,
            &self.config,
        );

        self.cache.durable().insert(&session).await?;
        self.cache.mirror(&session).await;

        info!(
            "Created session {} for owner {} (persistent: {})",
            session.session_id, owner_ref, session.persistent
        );

        self.emit(SessionEvent::Created {
            session_id: session.session_id.clone(),
            owner_ref: session.owner_ref.clone(),
            ip_address: session.ip_address.clone(),
            persistent: session.persistent,
            at: now,
        })
        .await;

        Ok(session)
    }

    /// Get a session by ID, cache first. Ended sessions are returned as
    /// they are; callers decide what "valid" means for them.
    pub async fn get_session(&self, session_id: &str) -> Result<Session, SessionError> {
        self.cache
            .read_through(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Get a session that is usable for authentication right now
    pub async fn get_valid_session(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = self.get_session(session_id).await?;
        if session.is_valid_at(self.clock.now()) {
            Ok(session)
        } else {
            Err(SessionError::Ended(session_id.to_string()))
        }
    }

    /// Push the expiry of a live session out by `additional` and return the
    /// new expiry
    pub async fn extend_session(
        &self,
        session_id: &str,
        additional: Duration,
    ) -> Result<DateTime<Utc>, SessionError> {
        let current = self.get_valid_session(session_id).await?;
        let id = current.session_id.clone();

        let updated = self
            .cache
            .write_both(|durable| async move {
                durable.update_expiry(&id, ExpiryUpdate::By(additional)).await
            })
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        // Lost a race with invalidation
        if updated.is_ended {
            return Err(SessionError::Ended(session_id.to_string()));
        }

        info!(
            "Extended session {} to {}",
            session_id, updated.expires_at
        );
        Ok(updated.expires_at)
    }

    /// Count a request against the session. Persistent sessions slide
    /// forward when less than half of their lifetime is left.
    pub async fn record_activity(&self, session_id: &str) -> Result<Session, SessionError> {
        let now = self.clock.now();
        let id = session_id.to_string();
        let mut session = self
            .cache
            .durable()
            .record_activity(&id, now)
            .await?
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        if self.config.sliding_persistent_expiry
            && session.persistent
            && session.is_valid_at(now)
        {
            let lifetime = self.config.duration_for(true);
            if session.remaining(now) < lifetime / 2 {
                let target = now + lifetime;
                if let Some(updated) = self
                    .cache
                    .write_both(|durable| async move {
                        durable
                            .update_expiry(&id, ExpiryUpdate::AtLeast(target))
                            .await
                    })
                    .await?
                {
                    debug!("Slid persistent session {} to {}", session_id, updated.expires_at);
                    session = updated;
                }
            }
        }

        Ok(session)
    }

    /// End a session. Idempotent: a second call changes nothing and emits
    /// nothing. Returns whether this call performed the transition.
    pub async fn invalidate_session(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<bool, SessionError> {
        let now = self.clock.now();
        let id = session_id.to_string();
        let why = reason.to_string();

        let outcome = self
            .cache
            .write_both(|durable| async move { durable.end_session(&id, &why, now).await })
            .await?;

        match outcome {
            EndResult::Ended(session) => {
                info!("Session {} invalidated: {}", session_id, reason);
                self.emit(SessionEvent::Invalidated {
                    session_id: session.session_id.clone(),
                    owner_ref: session.owner_ref.clone(),
                    reason: reason.to_string(),
                    at: now,
                })
                .await;
                Ok(true)
            }
            EndResult::AlreadyEnded(_) => {
                debug!("Session {} already ended", session_id);
                Ok(false)
            }
            EndResult::NotFound => Err(SessionError::NotFound(session_id.to_string())),
        }
    }

    /// End up to `limit` sessions whose expiry has passed. Safe to run
    /// concurrently with itself: each row transitions at most once.
    pub async fn end_expired_batch(&self, limit: usize) -> Result<ExpiredBatch, SessionError> {
        let now = self.clock.now();
        let expired = self.cache.durable().find_expired(now, limit).await?;
        let found = expired.len();

        let mut ended = 0;
        for session_id in expired {
            match self.invalidate_session(&session_id, REASON_EXPIRED).await {
                Ok(true) => ended += 1,
                Ok(false) | Err(SessionError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(ExpiredBatch { found, ended })
    }

    /// End every session whose expiry has passed
    pub async fn end_expired_sessions(&self) -> Result<usize, SessionError> {
        self.end_expired_sessions_in_batches(EXPIRED_SCAN_BATCH).await
    }

    pub async fn end_expired_sessions_in_batches(
        &self,
        batch_size: usize,
    ) -> Result<usize, SessionError> {
        let batch_size = batch_size.max(1);
        let mut total = 0;
        loop {
            let batch = self.end_expired_batch(batch_size).await?;
            total += batch.ended;
            // Only a short scan means nothing expired is left. Rows another
            // writer ended meanwhile drop out of the next scan, so this ends.
            if batch.found < batch_size {
                break;
            }
        }

        if total > 0 {
            info!("Ended {} expired sessions", total);
        }
        Ok(total)
    }

    /// Drop fast-tier copies of sessions that ended before `cutoff`
    pub async fn evict_ended_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.cache.evict_ended_before(cutoff).await
    }

    /// Identity store callback: the owner was deleted or suspended
    pub async fn on_owner_deleted(&self, owner_ref: &str) -> Result<usize, SessionError> {
        let sessions = self.cache.durable().sessions_for_owner(owner_ref).await?;

        let mut ended = 0;
        for session in sessions.iter().filter(|s| !s.is_ended) {
            if self
                .invalidate_session(&session.session_id, REASON_OWNER_REVOKED)
                .await?
            {
                ended += 1;
            }
        }

        warn!("Revoked {} sessions for owner {}", ended, owner_ref);
        Ok(ended)
    }

    /// All sessions for an owner, most recent first
    pub async fn sessions_for_owner(&self, owner_ref: &str) -> Result<Vec<Session>, SessionError> {
        Ok(self.cache.durable().sessions_for_owner(owner_ref).await?)
    }

    /// Merge an enhanced fingerprint into the stored one. Emits `NewDevice`
    /// when the merged value matches none of the owner's other sessions.
    pub async fn apply_fingerprint(
        &self,
        session_id: &str,
        candidate: ScoredFingerprint,
    ) -> Result<bool, SessionError> {
        let current = self
            .cache
            .durable()
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let merged = self
            .engine
            .merge(current.device_fingerprint.as_ref(), candidate.clone());
        if merged != candidate {
            debug!(
                "Kept stored fingerprint for {} (confidence {:.2} > {:.2})",
                session_id, merged.confidence, candidate.confidence
            );
            return Ok(false);
        }

        let id = session_id.to_string();
        let written = self
            .cache
            .durable()
            .set_fingerprint_if_not_weaker(&id, &candidate)
            .await?;
        if !written {
            // A stronger fingerprint landed concurrently
            return Ok(false);
        }

        if let Some(updated) = self.cache.durable().get(&id).await? {
            self.cache.mirror(&updated).await;
        }

        let others: Vec<Session> = self
            .cache
            .durable()
            .sessions_for_owner(&current.owner_ref)
            .await?
            .into_iter()
            .filter(|s| s.session_id != session_id)
            .collect();

        let known = others.iter().any(|s| {
            s.device_fingerprint
                .as_ref()
                .is_some_and(|fp| fp.value == candidate.value)
        });
        if !others.is_empty() && !known {
            self.emit(SessionEvent::NewDevice {
                session_id: session_id.to_string(),
                owner_ref: current.owner_ref.clone(),
                ip_address: current.ip_address.clone(),
            })
            .await;
        }

        Ok(true)
    }

    pub async fn apply_device_info(
        &self,
        session_id: &str,
        info: &DeviceInfo,
    ) -> Result<(), SessionError> {
        if !self.cache.durable().set_device_info(session_id, info).await? {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        self.refresh_cached(session_id).await?;
        Ok(())
    }

    /// Store the resolved location. Emits `SuspiciousLocation` when the
    /// country differs from the owner's most recent other located session.
    pub async fn apply_location(
        &self,
        session_id: &str,
        location: &Location,
    ) -> Result<(), SessionError> {
        if !self.cache.durable().set_location(session_id, location).await? {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let Some(session) = self.refresh_cached(session_id).await? else {
            return Ok(());
        };

        let previous = self
            .cache
            .durable()
            .sessions_for_owner(&session.owner_ref)
            .await?
            .into_iter()
            .filter(|s| s.session_id != session_id)
            .find_map(|s| s.location_data.map(|l| l.country));

        if let Some(previous_country) = previous
            && !previous_country.eq_ignore_ascii_case(&location.country)
        {
            self.emit(SessionEvent::SuspiciousLocation {
                session_id: session_id.to_string(),
                owner_ref: session.owner_ref.clone(),
                previous_country,
                country: location.country.clone(),
            })
            .await;
        }
        Ok(())
    }

    /// Re-read the durable record and rewrite the fast-tier copy
    async fn refresh_cached(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let record = self.cache.durable().get(session_id).await?;
        if let Some(session) = &record {
            self.cache.mirror(session).await;
        }
        Ok(record)
    }

    async fn emit(&self, event: SessionEvent) {
        for observer in &self.observers {
            observer.on_event(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fingerprint::FingerprintConfig;
    use crate::session::cache::MemoryFastTier;
    use crate::session::events::BroadcastObserver;
    use crate::session::storage::MemoryDurableStore;
    use async_trait::async_trait;

    /// Fast tier that is always down
    struct BrokenFastTier;

    #[async_trait]
    impl FastTier for BrokenFastTier {
        async fn get(&self, _: &str) -> Result<Option<Session>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn put(&self, _: &Session, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn remove(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn evict_ended_before(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    /// Durable store that ends the first id of a scan on behalf of another
    /// writer, between the scan and the sweep acting on it
    struct LogoutDuringScan {
        inner: MemoryDurableStore,
        pending: parking_lot::Mutex<usize>,
    }

    #[async_trait]
    impl DurableStore for LogoutDuringScan {
        async fn insert(&self, session: &Session) -> Result<(), StoreError> {
            self.inner.insert(session).await
        }
        async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
            self.inner.get(session_id).await
        }
        async fn record_activity(
            &self,
            session_id: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<Session>, StoreError> {
            self.inner.record_activity(session_id, now).await
        }
        async fn update_expiry(
            &self,
            session_id: &str,
            update: ExpiryUpdate,
        ) -> Result<Option<Session>, StoreError> {
            self.inner.update_expiry(session_id, update).await
        }
        async fn end_session(
            &self,
            session_id: &str,
            reason: &str,
            now: DateTime<Utc>,
        ) -> Result<EndResult, StoreError> {
            self.inner.end_session(session_id, reason, now).await
        }
        async fn set_fingerprint_if_not_weaker(
            &self,
            session_id: &str,
            candidate: &ScoredFingerprint,
        ) -> Result<bool, StoreError> {
            self.inner
                .set_fingerprint_if_not_weaker(session_id, candidate)
                .await
        }
        async fn set_device_info(
            &self,
            session_id: &str,
            info: &DeviceInfo,
        ) -> Result<bool, StoreError> {
            self.inner.set_device_info(session_id, info).await
        }
        async fn set_location(
            &self,
            session_id: &str,
            location: &Location,
        ) -> Result<bool, StoreError> {
            self.inner.set_location(session_id, location).await
        }
        async fn find_expired(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<String>, StoreError> {
            let expired = self.inner.find_expired(now, limit).await?;
            let interfere = {
                let mut pending = self.pending.lock();
                let go = *pending > 0 && !expired.is_empty();
                if go {
                    *pending -= 1;
                }
                go
            };
            if interfere {
                self.inner.end_session(&expired[0], REASON_LOGOUT, now).await?;
            }
            Ok(expired)
        }
        async fn sessions_for_owner(&self, owner_ref: &str) -> Result<Vec<Session>, StoreError> {
            self.inner.sessions_for_owner(owner_ref).await
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        fast: Arc<MemoryFastTier>,
        events: Arc<BroadcastObserver>,
        manager: SessionManager,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let fast = Arc::new(MemoryFastTier::new(clock.clone()));
        let events = Arc::new(BroadcastObserver::new(64));
        let manager = SessionManager::new(
            Arc::new(MemoryDurableStore::new()),
            fast.clone(),
            Arc::new(DeviceFingerprintEngine::new(FingerprintConfig::default())),
            clock.clone(),
            SessionConfig::default(),
        )
        .with_observer(events.clone());
        Fixture {
            clock,
            fast,
            events,
            manager,
        }
    }

    fn context(persistent: bool) -> SessionContext {
        SessionContext {
            ip_address: "192.168.1.1".to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
            persistent,
        }
    }

    #[tokio::test]
    async fn test_create_session_writes_both_tiers() {
        let f = fixture();
        let mut rx = f.events.subscribe();

        let session = f.manager.create_session("user-123", &context(false)).await.unwrap();

        assert_eq!(session.owner_ref, "user-123");
        assert_eq!(session.fast_fingerprint.len(), 64);
        assert!(f.fast.get(&session.session_id).await.unwrap().is_some());
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Created { .. }));
    }

    #[tokio::test]
    async fn test_get_session_not_found() {
        let f = fixture();
        assert!(matches!(
            f.manager.get_session("missing").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_twice_is_a_no_op() {
        let f = fixture();
        let mut rx = f.events.subscribe();
        let session = f.manager.create_session("user-123", &context(false)).await.unwrap();
        rx.recv().await.unwrap();

        assert!(f.manager.invalidate_session(&session.session_id, "logout").await.unwrap());
        let first = f.manager.get_session(&session.session_id).await.unwrap();

        f.clock.advance(Duration::seconds(30));
        assert!(!f.manager.invalidate_session(&session.session_id, "logout").await.unwrap());
        let second = f.manager.get_session(&session.session_id).await.unwrap();

        assert!(first.is_ended && !first.is_active);
        assert_eq!(first.ended_at, second.ended_at);
        assert_eq!(first.expires_at, second.expires_at);
        assert_eq!(second.termination_reason.as_deref(), Some("logout"));

        // Exactly one invalidation event
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Invalidated { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalidation_visible_through_cache() {
        let f = fixture();
        let session = f.manager.create_session("user-123", &context(false)).await.unwrap();
        f.manager.get_session(&session.session_id).await.unwrap();

        f.manager.invalidate_session(&session.session_id, "logout").await.unwrap();

        let read = f.manager.get_session(&session.session_id).await.unwrap();
        assert!(read.is_ended);
        assert!(f.manager.get_valid_session(&session.session_id).await.is_err());
    }

    #[tokio::test]
    async fn test_extend_session_moves_expiry_forward() {
        let f = fixture();
        let session = f.manager.create_session("user-123", &context(false)).await.unwrap();

        let new_expiry = f
            .manager
            .extend_session(&session.session_id, Duration::hours(2))
            .await
            .unwrap();

        assert_eq!(new_expiry, session.expires_at + Duration::hours(2));
        let cached = f.fast.get(&session.session_id).await.unwrap().unwrap();
        assert_eq!(cached.expires_at, new_expiry);
    }

    #[tokio::test]
    async fn test_extend_ended_session_fails() {
        let f = fixture();
        let session = f.manager.create_session("user-123", &context(false)).await.unwrap();
        f.manager.invalidate_session(&session.session_id, "logout").await.unwrap();

        assert!(matches!(
            f.manager.extend_session(&session.session_id, Duration::hours(1)).await,
            Err(SessionError::Ended(_))
        ));
    }

    #[tokio::test]
    async fn test_end_expired_sessions_only_touches_expired() {
        let f = fixture();
        let old = f.manager.create_session("user-1", &context(false)).await.unwrap();
        f.clock.advance(Duration::hours(23));
        let young = f.manager.create_session("user-2", &context(false)).await.unwrap();
        f.clock.advance(Duration::hours(2));

        let ended = f.manager.end_expired_sessions().await.unwrap();
        assert_eq!(ended, 1);

        let old = f.manager.get_session(&old.session_id).await.unwrap();
        let young = f.manager.get_session(&young.session_id).await.unwrap();
        assert!(old.is_ended);
        assert_eq!(old.termination_reason.as_deref(), Some(REASON_EXPIRED));
        assert!(young.is_active && !young.is_ended);

        // Second run finds nothing
        assert_eq!(f.manager.end_expired_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_end_each_session_once() {
        let f = fixture();
        for i in 0..25 {
            f.manager
                .create_session(&format!("user-{}", i), &context(false))
                .await
                .unwrap();
        }
        f.clock.advance(Duration::days(2));

        let manager = Arc::new(f.manager);
        let a = {
            let m = manager.clone();
            tokio::spawn(async move { m.end_expired_sessions_in_batches(4).await.unwrap() })
        };
        let b = {
            let m = manager.clone();
            tokio::spawn(async move { m.end_expired_sessions_in_batches(7).await.unwrap() })
        };

        let total = a.await.unwrap() + b.await.unwrap();
        assert_eq!(total, 25);
        assert_eq!(manager.end_expired_sessions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_finishes_when_a_batch_member_ends_elsewhere() {
        let clock = Arc::new(ManualClock::starting_now());
        let durable = Arc::new(LogoutDuringScan {
            inner: MemoryDurableStore::new(),
            pending: parking_lot::Mutex::new(1),
        });
        let manager = SessionManager::new(
            durable.clone(),
            Arc::new(MemoryFastTier::new(clock.clone())),
            Arc::new(DeviceFingerprintEngine::default()),
            clock.clone(),
            SessionConfig::default(),
        );

        let mut ids = Vec::new();
        for i in 0..5 {
            let s = manager
                .create_session(&format!("user-{}", i), &context(false))
                .await
                .unwrap();
            ids.push(s.session_id);
        }
        clock.advance(Duration::days(2));

        // First batch: one of its two ids is logged out before the sweep
        // reaches it, so the sweep itself ends only one
        let ended = manager.end_expired_sessions_in_batches(2).await.unwrap();
        assert_eq!(ended, 4);

        for id in &ids {
            assert!(manager.get_session(id).await.unwrap().is_ended);
        }
        assert!(durable.find_expired(clock.now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fast_tier_outage_falls_back_to_durable() {
        let clock = Arc::new(ManualClock::starting_now());
        let manager = SessionManager::new(
            Arc::new(MemoryDurableStore::new()),
            Arc::new(BrokenFastTier),
            Arc::new(DeviceFingerprintEngine::default()),
            clock,
            SessionConfig::default(),
        );

        let session = manager.create_session("user-123", &context(false)).await.unwrap();
        let read = manager.get_valid_session(&session.session_id).await.unwrap();
        assert_eq!(read.session_id, session.session_id);

        assert!(manager.invalidate_session(&session.session_id, "logout").await.unwrap());
        assert!(manager.get_valid_session(&session.session_id).await.is_err());
    }

    #[tokio::test]
    async fn test_record_activity_counts_pages() {
        let f = fixture();
        let session = f.manager.create_session("user-123", &context(false)).await.unwrap();

        for _ in 0..3 {
            f.manager.record_activity(&session.session_id).await.unwrap();
        }
        let stored = f.manager.sessions_for_owner("user-123").await.unwrap();
        assert_eq!(stored[0].pages_visited, 3);
        // Non-persistent sessions never slide
        assert_eq!(stored[0].expires_at, session.expires_at);
    }

    #[tokio::test]
    async fn test_persistent_session_slides_after_half_life() {
        let f = fixture();
        let session = f.manager.create_session("user-123", &context(true)).await.unwrap();

        f.clock.advance(Duration::days(10));
        let early = f.manager.record_activity(&session.session_id).await.unwrap();
        assert_eq!(early.expires_at, session.expires_at);

        f.clock.advance(Duration::days(10));
        let late = f.manager.record_activity(&session.session_id).await.unwrap();
        assert_eq!(late.expires_at, f.clock.now() + Duration::days(30));
    }

    #[tokio::test]
    async fn test_on_owner_deleted_revokes_all_live_sessions() {
        let f = fixture();
        for _ in 0..3 {
            f.manager.create_session("user-123", &context(false)).await.unwrap();
        }
        let other = f.manager.create_session("user-999", &context(false)).await.unwrap();

        assert_eq!(f.manager.on_owner_deleted("user-123").await.unwrap(), 3);
        for s in f.manager.sessions_for_owner("user-123").await.unwrap() {
            assert!(s.is_ended);
            assert_eq!(s.termination_reason.as_deref(), Some(REASON_OWNER_REVOKED));
        }
        assert!(f.manager.get_valid_session(&other.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_apply_fingerprint_respects_confidence_and_flags_new_device() {
        let f = fixture();
        let first = f.manager.create_session("user-123", &context(false)).await.unwrap();
        let second = f.manager.create_session("user-123", &context(false)).await.unwrap();
        let mut rx = f.events.subscribe();

        let strong = ScoredFingerprint::new("device-a", 0.9);
        assert!(f.manager.apply_fingerprint(&first.session_id, strong).await.unwrap());
        // The other session still carries only its fast fingerprint
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::NewDevice { .. }));

        let weak = ScoredFingerprint::new("device-b", 0.5);
        assert!(!f.manager.apply_fingerprint(&first.session_id, weak).await.unwrap());

        // Same device on the second session is not new
        let same = ScoredFingerprint::new("device-a", 0.9);
        assert!(f.manager.apply_fingerprint(&second.session_id, same).await.unwrap());
        assert!(rx.try_recv().is_err());

        let stored = f.manager.get_session(&first.session_id).await.unwrap();
        assert_eq!(stored.device_fingerprint.unwrap().value, "device-a");
        assert_eq!(stored.fast_fingerprint, first.fast_fingerprint);
    }

    #[tokio::test]
    async fn test_apply_location_flags_country_change() {
        let f = fixture();
        let first = f.manager.create_session("user-123", &context(false)).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        let second = f.manager.create_session("user-123", &context(false)).await.unwrap();
        let mut rx = f.events.subscribe();

        let berlin = Location {
            country: "DE".to_string(),
            region: None,
            city: Some("Berlin".to_string()),
            latitude: None,
            longitude: None,
        };
        f.manager.apply_location(&first.session_id, &berlin).await.unwrap();
        assert!(rx.try_recv().is_err());

        let lagos = Location {
            country: "NG".to_string(),
            city: Some("Lagos".to_string()),
            ..berlin.clone()
        };
        f.manager.apply_location(&second.session_id, &lagos).await.unwrap();

        match rx.recv().await.unwrap() {
            SessionEvent::SuspiciousLocation {
                previous_country,
                country,
                ..
            } => {
                assert_eq!(previous_country, "DE");
                assert_eq!(country, "NG");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
