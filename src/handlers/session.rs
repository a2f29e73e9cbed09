use axum::{
    Extension, Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;

use super::{ApiError, AppState, client_ip, user_agent};
use crate::enrichment::EnrichmentTask;
use crate::fingerprint::{ClientFingerprintPayload, ServerObservations};
use crate::middleware::AuthContext;
use crate::session::SessionInfo;

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtendResponse {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// The session behind the bearer token
pub async fn current_session(Extension(auth): Extension<AuthContext>) -> Json<SessionInfo> {
    Json(auth.session.to_info(true))
}

/// The owner's live sessions, most recent first
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<SessionInfo>>, ApiError> {
    let now = state.sessions.now();
    let sessions = state
        .sessions
        .sessions_for_owner(&auth.claims.sub)
        .await?
        .into_iter()
        .filter(|s| s.is_valid_at(now))
        .map(|s| {
            let is_current = s.session_id == auth.claims.sid;
            s.to_info(is_current)
        })
        .collect();

    Ok(Json(sessions))
}

/// Accept client fingerprint signals for background processing
pub async fn submit_fingerprint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<ClientFingerprintPayload>,
) -> (StatusCode, Json<Value>) {
    let queued = state.enrichment.submit(EnrichmentTask::EnhanceFingerprint {
        session_id: auth.claims.sid.clone(),
        payload,
        observations: ServerObservations {
            ip_address: client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
            user_agent: user_agent(&headers),
        },
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "session_id": auth.claims.sid,
            "queued": queued,
        })),
    )
}

pub async fn extend_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<ExtendRequest>,
) -> Result<Json<ExtendResponse>, ApiError> {
    if payload.seconds <= 0 {
        return Err(ApiError::BadRequest(
            "seconds must be positive".to_string(),
        ));
    }

    let expires_at = state
        .sessions
        .extend_session(&auth.claims.sid, Duration::seconds(payload.seconds))
        .await?;

    Ok(Json(ExtendResponse {
        session_id: auth.claims.sid,
        expires_at,
    }))
}
