// Redis-backed fast session tier
// Shares cached sessions across instances. Ended sessions are additionally
// indexed by `ended_at` so retention eviction does not need a key scan.

use super::cache::FastTier;
use super::error::StoreError;
use super::types::Session;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::{AsyncCommands, aio::MultiplexedConnection};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const ENDED_INDEX_KEY: &str = "sessions:ended";

/// Redis fast tier
pub struct RedisFastTier {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisFastTier {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn session_key(session_id: &str) -> String {
        format!("session:{}", session_id)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    // Round up so a sub-second remainder still caches
    let millis = ttl.num_milliseconds().max(1);
    ((millis + 999) / 1000) as u64
}

#[async_trait]
impl FastTier for RedisFastTier {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn.lock().await;
        let raw: Option<String> = conn.get(Self::session_key(session_id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    async fn put(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let key = Self::session_key(&session.session_id);
        let json = serde_json::to_string(session)?;
        let mut conn = self.conn.lock().await;

        let mut pipe = redis::pipe();
        pipe.atomic().set_ex(&key, json, ttl_secs(ttl));
        match session.ended_at {
            Some(ended_at) if session.is_ended => {
                pipe.zadd(ENDED_INDEX_KEY, &session.session_id, ended_at.timestamp());
            }
            _ => {
                pipe.zrem(ENDED_INDEX_KEY, &session.session_id);
            }
        }
        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let _: () = redis::pipe()
            .del(Self::session_key(session_id))
            .zrem(ENDED_INDEX_KEY, session_id)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn evict_ended_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().await;
        // Strictly older than the cutoff
        let max_score = format!("({}", cutoff.timestamp());

        let stale: Vec<String> = conn
            .zrangebyscore(ENDED_INDEX_KEY, "-inf", &max_score)
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        for session_id in &stale {
            pipe.del(Self::session_key(session_id)).ignore();
        }
        pipe.zrembyscore(ENDED_INDEX_KEY, "-inf", &max_score).ignore();
        let _: () = pipe.query_async(&mut *conn).await?;

        debug!("Evicted {} ended sessions from redis", stale.len());
        Ok(stale.len())
    }
}
