// Session lifecycle events and the observers that receive them
// Observers are injected into the session manager and called synchronously at
// the point the event happens. Delivery to users (email, push) is the
// notification collaborator's job; it subscribes through `BroadcastObserver`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Security-relevant session events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Created {
        session_id: String,
        owner_ref: String,
        ip_address: String,
        persistent: bool,
        at: DateTime<Utc>,
    },
    Invalidated {
        session_id: String,
        owner_ref: String,
        reason: String,
        at: DateTime<Utc>,
    },
    /// Enhanced fingerprint matches none of the owner's other sessions
    NewDevice {
        session_id: String,
        owner_ref: String,
        ip_address: String,
    },
    /// Resolved country differs from the owner's previous session
    SuspiciousLocation {
        session_id: String,
        owner_ref: String,
        previous_country: String,
        country: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Created { session_id, .. }
            | SessionEvent::Invalidated { session_id, .. }
            | SessionEvent::NewDevice { session_id, .. }
            | SessionEvent::SuspiciousLocation { session_id, .. } => session_id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::Created { .. } => "session_created",
            SessionEvent::Invalidated { .. } => "session_invalidated",
            SessionEvent::NewDevice { .. } => "new_device",
            SessionEvent::SuspiciousLocation { .. } => "suspicious_location",
        }
    }
}

/// Receives session lifecycle events. Must not fail the operation that
/// emitted the event; implementations swallow their own errors.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_event(&self, event: &SessionEvent);
}

/// Writes every event to the log
pub struct TracingObserver;

#[async_trait]
impl SessionObserver for TracingObserver {
    async fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::NewDevice { owner_ref, .. } => {
                warn!("Session event {} for owner {}", event.as_str(), owner_ref)
            }
            SessionEvent::SuspiciousLocation {
                owner_ref,
                previous_country,
                country,
                ..
            } => warn!(
                "Session event {} for owner {}: {} -> {}",
                event.as_str(),
                owner_ref,
                previous_country,
                country
            ),
            _ => info!(
                "Session event {} for session {}",
                event.as_str(),
                event.session_id()
            ),
        }
    }
}

/// Republishes events on a broadcast channel
pub struct BroadcastObserver {
    sender: broadcast::Sender<SessionEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl SessionObserver for BroadcastObserver {
    async fn on_event(&self, event: &SessionEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_observer_delivers() {
        let observer = BroadcastObserver::new(8);
        let mut rx = observer.subscribe();

        let event = SessionEvent::NewDevice {
            session_id: "s-1".to_string(),
            owner_ref: "user-1".to_string(),
            ip_address: "203.0.113.9".to_string(),
        };
        observer.on_event(&event).await;

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_silent() {
        let observer = BroadcastObserver::new(8);
        observer
            .on_event(&SessionEvent::Invalidated {
                session_id: "s-1".to_string(),
                owner_ref: "user-1".to_string(),
                reason: "logout".to_string(),
                at: Utc::now(),
            })
            .await;
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SessionEvent::SuspiciousLocation {
            session_id: "s-1".to_string(),
            owner_ref: "user-1".to_string(),
            previous_country: "DE".to_string(),
            country: "BR".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "suspicious_location");
        assert_eq!(json["country"], "BR");
    }
}
