// Deferred session enrichment
// Runs after the response that created or used the session has been built.
// Nothing here can affect an issued session or token; failures are logged.

use super::geo::{GeoLocator, is_routable};
use super::queue::{TaskError, TaskHandler};
use crate::fingerprint::{
    ClientFingerprintPayload, FingerprintError, ServerObservations, parse_user_agent,
};
use crate::session::{Session, SessionError, SessionManager};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Unit of deferred work against one session
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentTask {
    EnhanceFingerprint {
        session_id: String,
        payload: ClientFingerprintPayload,
        observations: ServerObservations,
    },
    ResolveLocation {
        session_id: String,
        ip_address: String,
    },
    ParseDevice {
        session_id: String,
        user_agent: String,
    },
}

impl EnrichmentTask {
    pub fn session_id(&self) -> &str {
        match self {
            EnrichmentTask::EnhanceFingerprint { session_id, .. }
            | EnrichmentTask::ResolveLocation { session_id, .. }
            | EnrichmentTask::ParseDevice { session_id, .. } => session_id,
        }
    }

    /// Tasks queued after login
    pub fn for_new_session(session: &Session) -> Vec<EnrichmentTask> {
        let mut tasks = vec![EnrichmentTask::ResolveLocation {
            session_id: session.session_id.clone(),
            ip_address: session.ip_address.clone(),
        }];
        if let Some(user_agent) = &session.user_agent {
            tasks.push(EnrichmentTask::ParseDevice {
                session_id: session.session_id.clone(),
                user_agent: user_agent.clone(),
            });
        }
        tasks
    }
}

/// Executes enrichment tasks against the session manager
pub struct EnrichmentHandler {
    sessions: Arc<SessionManager>,
    locator: Arc<dyn GeoLocator>,
}

impl EnrichmentHandler {
    pub fn new(sessions: Arc<SessionManager>, locator: Arc<dyn GeoLocator>) -> Self {
        Self { sessions, locator }
    }

    async fn enhance_fingerprint(
        &self,
        session_id: &str,
        payload: &ClientFingerprintPayload,
        observations: &ServerObservations,
    ) -> Result<(), TaskError> {
        let candidate = self
            .sessions
            .engine()
            .compute_enhanced(payload, observations)
            .map_err(|e: FingerprintError| TaskError::Permanent(e.to_string()))?;

        let applied = self
            .sessions
            .apply_fingerprint(session_id, candidate)
            .await
            .map_err(session_failure)?;
        debug!(
            "Enhanced fingerprint for session {} {}",
            session_id,
            if applied { "applied" } else { "kept existing" }
        );
        Ok(())
    }

    async fn resolve_location(&self, session_id: &str, ip_address: &str) -> Result<(), TaskError> {
        let ip: IpAddr = ip_address
            .parse()
            .map_err(|_| TaskError::Permanent(format!("invalid ip address {}", ip_address)))?;
        if !is_routable(&ip) {
            debug!("Skipping geolocation for non-routable {}", ip);
            return Ok(());
        }

        let location = self
            .locator
            .locate(ip)
            .await
            .map_err(|e| TaskError::Retryable(e.to_string()))?;
        let Some(location) = location else {
            return Ok(());
        };

        self.sessions
            .apply_location(session_id, &location)
            .await
            .map_err(session_failure)?;
        info!("Session {} located in {}", session_id, location.country);
        Ok(())
    }

    async fn parse_device(&self, session_id: &str, user_agent: &str) -> Result<(), TaskError> {
        let device = parse_user_agent(user_agent);
        self.sessions
            .apply_device_info(session_id, &device)
            .await
            .map_err(session_failure)
    }
}

fn session_failure(err: SessionError) -> TaskError {
    match err {
        SessionError::Durable(e) => TaskError::Retryable(e.to_string()),
        other => TaskError::Permanent(other.to_string()),
    }
}

#[async_trait]
impl TaskHandler<EnrichmentTask> for EnrichmentHandler {
    async fn handle(&self, task: &EnrichmentTask) -> Result<(), TaskError> {
        match task {
            EnrichmentTask::EnhanceFingerprint {
                session_id,
                payload,
                observations,
            } => {
                self.enhance_fingerprint(session_id, payload, observations)
                    .await
            }
            EnrichmentTask::ResolveLocation {
                session_id,
                ip_address,
            } => self.resolve_location(session_id, ip_address).await,
            EnrichmentTask::ParseDevice {
                session_id,
                user_agent,
            } => self.parse_device(session_id, user_agent).await,
        }
    }
}
