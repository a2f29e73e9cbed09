use axum::{
    Extension, Json,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{debug, error, info};

use super::{ApiError, AppState, client_ip, user_agent};
use crate::enrichment::EnrichmentTask;
use crate::fingerprint::{ClientFingerprintPayload, ServerObservations};
use crate::middleware::AuthContext;
use crate::session::{REASON_LOGOUT, SessionContext};
use crate::token::TokenError;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
    /// Client fingerprint signals, if the login page collected them
    pub fingerprint: Option<ClientFingerprintPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub session_id: String,
    /// Session expiry
    pub expires_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    pub refresh: String,
    pub session_id: String,
}

pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }

    let owner = state
        .identities
        .authenticate(&payload.username, &payload.password)
        .await?;

    let context = SessionContext {
        ip_address: client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
        user_agent: user_agent(&headers),
        persistent: payload.remember_me,
    };
    let session = state
        .sessions
        .create_session(&owner.owner_ref, &context)
        .await?;
    let pair = state.tokens.issue(&owner, &session)?;

    let response = LoginResponse {
        access: pair.access,
        refresh: pair.refresh,
        session_id: session.session_id.clone(),
        expires_at: session.expires_at,
        access_expires_at: pair.access_expires_at,
    };

    // Everything below is deferred and cannot change the response
    let mut tasks = EnrichmentTask::for_new_session(&session);
    if let Some(fingerprint) = payload.fingerprint {
        tasks.push(EnrichmentTask::EnhanceFingerprint {
            session_id: session.session_id.clone(),
            payload: fingerprint,
            observations: ServerObservations {
                ip_address: context.ip_address.clone(),
                user_agent: context.user_agent.clone(),
            },
        });
    }
    for task in tasks {
        state.enrichment.submit(task);
    }

    info!(
        "User {} logged in with session {}",
        owner.username, session.session_id
    );
    Ok(Json(response))
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, ApiError> {
    // An unreadable refresh body is a malformed token, not a 422
    let Json(payload) = payload.map_err(|rejection| {
        debug!("Rejected refresh body: {}", rejection);
        ApiError::Token(TokenError::Malformed)
    })?;
    let pair = state.tokens.refresh(&payload.refresh).await?;

    Ok(Json(RefreshResponse {
        access: pair.access,
        refresh: pair.refresh,
        session_id: pair.session_id,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode, ApiError> {
    match state
        .sessions
        .invalidate_session(&auth.claims.sid, REASON_LOGOUT)
        .await
    {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            error!("Logout failed for session {}: {}", auth.claims.sid, e);
            Err(e.into())
        }
    }
}
