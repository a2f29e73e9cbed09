// Session types and data structures

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a regular session
    pub default_duration_secs: i64,
    /// Lifetime of a "remember me" session
    pub persistent_duration_secs: i64,
    /// Upper bound for a fast-tier entry TTL. Bounds how long a cached copy
    /// can lag behind the durable record.
    pub fast_tier_max_ttl_secs: i64,
    /// How long an ended session stays in the fast tier (0 removes it immediately)
    pub ended_retention_secs: i64,
    /// Slide persistent sessions forward on activity
    pub sliding_persistent_expiry: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: 86400,         // 24 hours
            persistent_duration_secs: 2_592_000,  // 30 days
            fast_tier_max_ttl_secs: 300,
            ended_retention_secs: 86400,
            sliding_persistent_expiry: true,
        }
    }
}

impl SessionConfig {
    pub fn duration_for(&self, persistent: bool) -> Duration {
        if persistent {
            Duration::seconds(self.persistent_duration_secs)
        } else {
            Duration::seconds(self.default_duration_secs)
        }
    }

    pub fn ended_retention(&self) -> Duration {
        Duration::seconds(self.ended_retention_secs)
    }
}

/// Request context captured at login
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub ip_address: String,
    pub user_agent: Option<String>,
    /// "Remember me"
    pub persistent: bool,
}

/// Device information parsed from user agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device type (desktop, mobile, tablet)
    pub device_type: String,
    pub os: String,
    pub browser: String,
    pub browser_version: Option<String>,
}

/// Location information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Country code (ISO 3166-1 alpha-2)
    pub country: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A fingerprint value together with how much it can be trusted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFingerprint {
    pub value: String,
    /// 0.0 ..= 1.0
    pub confidence: f64,
}

impl ScoredFingerprint {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Authenticated session. One durable record per login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub session_id: String,
    /// Reference to the external identity
    pub owner_ref: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    /// Filled asynchronously from the user agent
    pub device_info: Option<DeviceInfo>,
    /// Filled asynchronously from geolocation
    pub location_data: Option<Location>,
    /// Merged, highest-confidence device identifier
    pub device_fingerprint: Option<ScoredFingerprint>,
    /// Cheap identifier computed at login, never overwritten
    pub fast_fingerprint: String,
    pub persistent: bool,
    pub pages_visited: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub termination_reason: Option<String>,
    pub is_active: bool,
    pub is_ended: bool,
}

/// Session information for display
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_info: Option<DeviceInfo>,
    pub location: Option<Location>,
    pub persistent: bool,
    pub pages_visited: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_current: bool,
}

impl Session {
    /// Build a fresh active session
    pub fn new(
        owner_ref: String,
        context: &SessionContext,
        fast_fingerprint: ScoredFingerprint,
        now: DateTime<Utc>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            owner_ref,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            device_info: None,
            location_data: None,
            fast_fingerprint: fast_fingerprint.value.clone(),
            device_fingerprint: Some(fast_fingerprint),
            persistent: context.persistent,
            pages_visited: 0,
            started_at: now,
            last_activity_at: now,
            ended_at: None,
            expires_at: now + config.duration_for(context.persistent),
            termination_reason: None,
            is_active: true,
            is_ended: false,
        }
    }

    /// Usable for authentication at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_ended && self.expires_at > now
    }

    /// Time left before expiry, never negative
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Transition to the ended state. Returns false if it was already ended.
    pub fn end(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.is_ended {
            return false;
        }
        self.is_ended = true;
        self.is_active = false;
        self.ended_at = Some(now);
        self.expires_at = now;
        self.termination_reason = Some(reason.to_string());
        true
    }

    pub fn to_info(&self, is_current: bool) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            device_info: self.device_info.clone(),
            location: self.location_data.clone(),
            persistent: self.persistent,
            pages_visited: self.pages_visited,
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            expires_at: self.expires_at,
            is_current,
        }
    }
}

/// Expiry mutation applied by the durable tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpiryUpdate {
    /// Push the current expiry out by a fixed amount
    By(Duration),
    /// Move the expiry to at least this instant
    AtLeast(DateTime<Utc>),
}

impl ExpiryUpdate {
    /// New expiry for a record currently expiring at `current`. Never earlier than `current`.
    pub fn apply(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            ExpiryUpdate::By(extra) => current + extra.max(Duration::zero()),
            ExpiryUpdate::AtLeast(at) => current.max(at),
        }
    }
}

/// Result of ending a session in the durable tier
#[derive(Debug, Clone)]
pub enum EndResult {
    /// This call performed the transition
    Ended(Session),
    /// Session had already ended; nothing changed
    AlreadyEnded(Session),
    NotFound,
}
