// Session management module
// Dual-tier session store (durable record + TTL fast tier) and the manager
// that keeps the two consistent.

pub mod cache;
pub mod error;
pub mod events;
pub mod manager;
pub mod redis_cache;
pub mod sqlite;
pub mod storage;
pub mod types;

pub use cache::{FastTier, MemoryFastTier, SessionCache};
pub use error::{SessionError, StoreError};
pub use events::{BroadcastObserver, SessionEvent, SessionObserver, TracingObserver};
pub use manager::{
    ExpiredBatch, REASON_EXPIRED, REASON_LOGOUT, REASON_OWNER_REVOKED, SessionManager,
};
pub use redis_cache::RedisFastTier;
pub use sqlite::SqliteDurableStore;
pub use storage::{DurableStore, MemoryDurableStore};
pub use types::{
    DeviceInfo, EndResult, ExpiryUpdate, Location, ScoredFingerprint, Session, SessionConfig,
    SessionContext, SessionInfo,
};
