pub mod auth;
pub mod error;
pub mod health;
pub mod session;

pub use error::ApiError;

use axum::{
    Router,
    http::HeaderMap,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::enrichment::{EnrichmentTask, TaskQueue};
use crate::identity::IdentityProvider;
use crate::middleware::require_session;
use crate::session::SessionManager;
use crate::token::TokenService;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub tokens: Arc<TokenService>,
    pub identities: Arc<dyn IdentityProvider>,
    pub enrichment: TaskQueue<EnrichmentTask>,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    // Routes behind bearer authentication
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/api/v1/sessions", get(session::list_sessions))
        .route("/api/v1/sessions/current", get(session::current_session))
        .route(
            "/api/v1/sessions/current/fingerprint",
            post(session::submit_fingerprint),
        )
        .route(
            "/api/v1/sessions/current/extend",
            post(session::extend_session),
        )
        .route_layer(from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/", get(health::health_check))
        .route("/health", get(health::health_check))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = headers
        .get("X-Real-IP")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "0.0.0.0".to_string())
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}
