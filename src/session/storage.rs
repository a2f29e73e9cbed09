// Durable session tier
// Authoritative, non-expiring record of every session. Writers only ever issue
// field-scoped updates so concurrent request handlers and enrichment workers
// never overwrite each other.

use super::error::StoreError;
use super::types::{
    DeviceInfo, EndResult, ExpiryUpdate, Location, ScoredFingerprint, Session,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Trait for durable session storage backends
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Store a new session. Fails if the id already exists.
    async fn insert(&self, session: &Session) -> Result<(), StoreError>;

    /// Get a session by ID
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Atomically bump `pages_visited` and stamp `last_activity_at`
    async fn record_activity(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Move `expires_at` forward on a live session. Returns the record after
    /// the update, or the unchanged record if it has already ended.
    async fn update_expiry(
        &self,
        session_id: &str,
        update: ExpiryUpdate,
    ) -> Result<Option<Session>, StoreError>;

    /// End a session. Only the first call for a given session transitions it.
    async fn end_session(
        &self,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EndResult, StoreError>;

    /// Replace the device fingerprint unless the stored one is more confident.
    /// Returns whether the candidate was written.
    async fn set_fingerprint_if_not_weaker(
        &self,
        session_id: &str,
        candidate: &ScoredFingerprint,
    ) -> Result<bool, StoreError>;

    async fn set_device_info(&self, session_id: &str, info: &DeviceInfo)
        -> Result<bool, StoreError>;

    async fn set_location(&self, session_id: &str, location: &Location)
        -> Result<bool, StoreError>;

    /// Ids of live sessions whose expiry is at or before `now`
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// All sessions for an owner, most recent first
    async fn sessions_for_owner(&self, owner_ref: &str) -> Result<Vec<Session>, StoreError>;
}

/// In-memory durable store
pub struct MemoryDurableStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::Unavailable(format!(
                "duplicate session id {}",
                session.session_id
            )));
        }
        debug!(
            "Storing session {} for owner {}",
            session.session_id, session.owner_ref
        );
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn record_activity(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(session_id).map(|session| {
            session.pages_visited += 1;
            session.last_activity_at = session.last_activity_at.max(now);
            session.clone()
        }))
    }

    async fn update_expiry(
        &self,
        session_id: &str,
        update: ExpiryUpdate,
    ) -> Result<Option<Session>, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(session_id).map(|session| {
            if session.is_active && !session.is_ended {
                session.expires_at = update.apply(session.expires_at);
            }
            session.clone()
        }))
    }

    async fn end_session(
        &self,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EndResult, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) => {
                if session.end(reason, now) {
                    info!("Ended session {}: {}", session_id, reason);
                    Ok(EndResult::Ended(session.clone()))
                } else {
                    Ok(EndResult::AlreadyEnded(session.clone()))
                }
            }
            None => Ok(EndResult::NotFound),
        }
    }

    async fn set_fingerprint_if_not_weaker(
        &self,
        session_id: &str,
        candidate: &ScoredFingerprint,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(false);
        };

        let stored_confidence = session
            .device_fingerprint
            .as_ref()
            .map(|fp| fp.confidence)
            .unwrap_or(0.0);

        if candidate.confidence >= stored_confidence {
            session.device_fingerprint = Some(candidate.clone());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn set_device_info(
        &self,
        session_id: &str,
        info: &DeviceInfo,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .get_mut(session_id)
            .map(|session| session.device_info = Some(info.clone()))
            .is_some())
    }

    async fn set_location(
        &self,
        session_id: &str,
        location: &Location,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .get_mut(session_id)
            .map(|session| session.location_data = Some(location.clone()))
            .is_some())
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.is_active && !s.is_ended && s.expires_at <= now)
            .take(limit)
            .map(|s| s.session_id.clone())
            .collect())
    }

    async fn sessions_for_owner(&self, owner_ref: &str) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut owned: Vec<Session> = sessions
            .values()
            .filter(|s| s.owner_ref == owner_ref)
            .cloned()
            .collect();

        // Sort by start time (most recent first)
        owned.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{SessionConfig, SessionContext};
    use chrono::Duration;

    fn session_at(owner: &str, now: DateTime<Utc>) -> Session {
        Session::new(
            owner.to_string(),
            &SessionContext {
                ip_address: "192.168.1.1".to_string(),
                user_agent: None,
                persistent: false,
            },
            ScoredFingerprint::new("fast", 0.25),
            now,
            &SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_session() {
        let store = MemoryDurableStore::new();
        let session = session_at("user-123", Utc::now());
        let session_id = session.session_id.clone();

        store.insert(&session).await.unwrap();

        let retrieved = store.get(&session_id).await.unwrap();
        assert_eq!(retrieved.unwrap().owner_ref, "user-123");
        assert!(store.insert(&session).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_activity_is_not_lost() {
        let store = Arc::new(MemoryDurableStore::new());
        let session = session_at("user-123", Utc::now());
        let session_id = session.session_id.clone();
        store.insert(&session).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let id = session_id.clone();
            handles.push(tokio::spawn(async move {
                store.record_activity(&id, Utc::now()).await.unwrap();
            }));
        }
        // A concurrent enrichment write must not clobber the counter
        store
            .set_location(
                &session_id,
                &Location {
                    country: "DE".to_string(),
                    region: None,
                    city: None,
                    latitude: None,
                    longitude: None,
                },
            )
            .await
            .unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(stored.pages_visited, 20);
        assert_eq!(stored.location_data.unwrap().country, "DE");
    }

    #[tokio::test]
    async fn test_end_session_is_idempotent() {
        let store = MemoryDurableStore::new();
        let now = Utc::now();
        let session = session_at("user-123", now);
        let session_id = session.session_id.clone();
        store.insert(&session).await.unwrap();

        assert!(matches!(
            store.end_session(&session_id, "logout", now).await.unwrap(),
            EndResult::Ended(_)
        ));
        match store
            .end_session(&session_id, "expired", now + Duration::seconds(5))
            .await
            .unwrap()
        {
            EndResult::AlreadyEnded(s) => {
                assert_eq!(s.termination_reason.as_deref(), Some("logout"));
                assert_eq!(s.ended_at, Some(now));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            store.end_session("missing", "logout", now).await.unwrap(),
            EndResult::NotFound
        ));
    }

    #[tokio::test]
    async fn test_ended_session_expiry_is_frozen() {
        let store = MemoryDurableStore::new();
        let now = Utc::now();
        let session = session_at("user-123", now);
        let session_id = session.session_id.clone();
        store.insert(&session).await.unwrap();
        store.end_session(&session_id, "logout", now).await.unwrap();

        let after = store
            .update_expiry(&session_id, ExpiryUpdate::By(Duration::hours(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.expires_at, now);
    }

    #[tokio::test]
    async fn test_fingerprint_confidence_never_downgrades() {
        let store = MemoryDurableStore::new();
        let session = session_at("user-123", Utc::now());
        let session_id = session.session_id.clone();
        store.insert(&session).await.unwrap();

        let strong = ScoredFingerprint::new("strong", 0.9);
        let weak = ScoredFingerprint::new("weak", 0.4);

        assert!(store.set_fingerprint_if_not_weaker(&session_id, &strong).await.unwrap());
        assert!(!store.set_fingerprint_if_not_weaker(&session_id, &weak).await.unwrap());

        let stored = store.get(&session_id).await.unwrap().unwrap();
        assert_eq!(stored.device_fingerprint.unwrap().value, "strong");
        assert_eq!(stored.fast_fingerprint, "fast");
    }

    #[tokio::test]
    async fn test_find_expired_skips_live_and_ended() {
        let store = MemoryDurableStore::new();
        let now = Utc::now();

        let old = session_at("user-1", now - Duration::days(2));
        let fresh = session_at("user-2", now);
        let ended = session_at("user-3", now - Duration::days(2));
        store.insert(&old).await.unwrap();
        store.insert(&fresh).await.unwrap();
        store.insert(&ended).await.unwrap();
        store
            .end_session(&ended.session_id, "logout", now - Duration::days(2))
            .await
            .unwrap();

        let expired = store.find_expired(now, 100).await.unwrap();
        assert_eq!(expired, vec![old.session_id.clone()]);
    }

    #[tokio::test]
    async fn test_sessions_for_owner_most_recent_first() {
        let store = MemoryDurableStore::new();
        let now = Utc::now();
        for i in 0..3 {
            store
                .insert(&session_at("user-123", now + Duration::seconds(i)))
                .await
                .unwrap();
        }
        store.insert(&session_at("user-999", now)).await.unwrap();

        let sessions = store.sessions_for_owner("user-123").await.unwrap();
        assert_eq!(sessions.len(), 3);
        assert!(sessions[0].started_at > sessions[2].started_at);
    }
}
