// SQLite-backed durable session tier
//
// Every mutation is a single conditional UPDATE so the database, not the
// caller, decides whether a transition happens.

use super::error::StoreError;
use super::storage::DurableStore;
use super::types::{
    DeviceInfo, EndResult, ExpiryUpdate, Location, ScoredFingerprint, Session,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SELECT_COLUMNS: &str = "session_id, owner_ref, ip_address, user_agent, device_info, \
     location_data, device_fingerprint, fingerprint_confidence, fast_fingerprint, persistent, \
     pages_visited, started_at, last_activity_at, ended_at, expires_at, termination_reason, \
     is_active, is_ended";

/// SQLite durable store
pub struct SqliteDurableStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDurableStore {
    /// Open (or create) the session database at the given path
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // WAL for concurrent readers alongside the sweeper
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                owner_ref TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                user_agent TEXT,
                device_info TEXT,
                location_data TEXT,
                device_fingerprint TEXT,
                fingerprint_confidence REAL NOT NULL DEFAULT 0,
                fast_fingerprint TEXT NOT NULL,
                persistent INTEGER NOT NULL,
                pages_visited INTEGER NOT NULL DEFAULT 0,
                started_at INTEGER NOT NULL,
                last_activity_at INTEGER NOT NULL,
                ended_at INTEGER,
                expires_at INTEGER NOT NULL,
                termination_reason TEXT,
                is_active INTEGER NOT NULL,
                is_ended INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner_ref);
            CREATE INDEX IF NOT EXISTS idx_sessions_expiry
                ON sessions(is_active, is_ended, expires_at);",
        )?;

        info!("SQLite session store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking database call off the async executor
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&*guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("sqlite worker: {e}")))?
    }
}

fn select_one(conn: &Connection, session_id: &str) -> Result<Option<Session>, StoreError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM sessions WHERE session_id = ?1");
    Ok(conn
        .query_row(&sql, params![session_id], row_to_session)
        .optional()?)
}

fn millis_to_time(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {ms}").into(),
        )
    })
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let fingerprint: Option<String> = row.get(6)?;
    let confidence: f64 = row.get(7)?;
    let ended_at: Option<i64> = row.get(13)?;
    let pages_visited: i64 = row.get(10)?;

    Ok(Session {
        session_id: row.get(0)?,
        owner_ref: row.get(1)?,
        ip_address: row.get(2)?,
        user_agent: row.get(3)?,
        device_info: json_column(row, 4)?,
        location_data: json_column(row, 5)?,
        device_fingerprint: fingerprint.map(|value| ScoredFingerprint { value, confidence }),
        fast_fingerprint: row.get(8)?,
        persistent: row.get(9)?,
        pages_visited: pages_visited.max(0) as u64,
        started_at: millis_to_time(11, row.get(11)?)?,
        last_activity_at: millis_to_time(12, row.get(12)?)?,
        ended_at: ended_at.map(|ms| millis_to_time(13, ms)).transpose()?,
        expires_at: millis_to_time(14, row.get(14)?)?,
        termination_reason: row.get(15)?,
        is_active: row.get(16)?,
        is_ended: row.get(17)?,
    })
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let session = session.clone();
        let device_info = session
            .device_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let location = session
            .location_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.run(move |conn| {
            let (fingerprint, confidence) = match &session.device_fingerprint {
                Some(fp) => (Some(fp.value.clone()), fp.confidence),
                None => (None, 0.0),
            };
            conn.execute(
                "INSERT INTO sessions (session_id, owner_ref, ip_address, user_agent, device_info,
                    location_data, device_fingerprint, fingerprint_confidence, fast_fingerprint,
                    persistent, pages_visited, started_at, last_activity_at, ended_at, expires_at,
                    termination_reason, is_active, is_ended)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    session.session_id,
                    session.owner_ref,
                    session.ip_address,
                    session.user_agent,
                    device_info,
                    location,
                    fingerprint,
                    confidence,
                    session.fast_fingerprint,
                    session.persistent,
                    session.pages_visited as i64,
                    session.started_at.timestamp_millis(),
                    session.last_activity_at.timestamp_millis(),
                    session.ended_at.map(|t| t.timestamp_millis()),
                    session.expires_at.timestamp_millis(),
                    session.termination_reason,
                    session.is_active,
                    session.is_ended,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let id = session_id.to_string();
        self.run(move |conn| select_one(conn, &id)).await
    }

    async fn record_activity(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let id = session_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET pages_visited = pages_visited + 1,
                     last_activity_at = MAX(last_activity_at, ?2)
                 WHERE session_id = ?1",
                params![id, now.timestamp_millis()],
            )?;
            select_one(conn, &id)
        })
        .await
    }

    async fn update_expiry(
        &self,
        session_id: &str,
        update: ExpiryUpdate,
    ) -> Result<Option<Session>, StoreError> {
        let id = session_id.to_string();
        self.run(move |conn| {
            match update {
                ExpiryUpdate::By(extra) => conn.execute(
                    "UPDATE sessions SET expires_at = expires_at + ?2
                     WHERE session_id = ?1 AND is_active = 1 AND is_ended = 0",
                    params![id, extra.num_milliseconds().max(0)],
                )?,
                ExpiryUpdate::AtLeast(at) => conn.execute(
                    "UPDATE sessions SET expires_at = MAX(expires_at, ?2)
                     WHERE session_id = ?1 AND is_active = 1 AND is_ended = 0",
                    params![id, at.timestamp_millis()],
                )?,
            };
            select_one(conn, &id)
        })
        .await
    }

    async fn end_session(
        &self,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EndResult, StoreError> {
        let id = session_id.to_string();
        let reason = reason.to_string();
        self.run(move |conn| {
            let ts = now.timestamp_millis();
            let changed = conn.execute(
                "UPDATE sessions
                 SET is_ended = 1, is_active = 0, ended_at = ?3, expires_at = ?3,
                     termination_reason = ?2
                 WHERE session_id = ?1 AND is_ended = 0",
                params![id, reason, ts],
            )?;

            Ok(match (changed, select_one(conn, &id)?) {
                (_, None) => EndResult::NotFound,
                (1, Some(session)) => EndResult::Ended(session),
                (_, Some(session)) => EndResult::AlreadyEnded(session),
            })
        })
        .await
    }

    async fn set_fingerprint_if_not_weaker(
        &self,
        session_id: &str,
        candidate: &ScoredFingerprint,
    ) -> Result<bool, StoreError> {
        let id = session_id.to_string();
        let candidate = candidate.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET device_fingerprint = ?2, fingerprint_confidence = ?3
                 WHERE session_id = ?1 AND fingerprint_confidence <= ?3",
                params![id, candidate.value, candidate.confidence],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn set_device_info(
        &self,
        session_id: &str,
        info: &DeviceInfo,
    ) -> Result<bool, StoreError> {
        let id = session_id.to_string();
        let json = serde_json::to_string(info)?;
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET device_info = ?2 WHERE session_id = ?1",
                params![id, json],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn set_location(
        &self,
        session_id: &str,
        location: &Location,
    ) -> Result<bool, StoreError> {
        let id = session_id.to_string();
        let json = serde_json::to_string(location)?;
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET location_data = ?2 WHERE session_id = ?1",
                params![id, json],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id FROM sessions
                 WHERE is_active = 1 AND is_ended = 0 AND expires_at <= ?1
                 LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(params![now.timestamp_millis(), limit as i64], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn sessions_for_owner(&self, owner_ref: &str) -> Result<Vec<Session>, StoreError> {
        let owner = owner_ref.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM sessions WHERE owner_ref = ?1 ORDER BY started_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let sessions = stmt
                .query_map(params![owner], row_to_session)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sessions)
        })
        .await
    }
}
