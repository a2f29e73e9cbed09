// Token rejections and their HTTP mapping

use crate::session::SessionError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// The single typed rejection surfaced at the API boundary. Every variant
/// fails closed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TokenError {
    #[error("token is malformed or has a bad signature")]
    Malformed,

    #[error("token has expired")]
    Expired,

    /// Access token whose session is missing, ended or past its expiry
    #[error("session is no longer valid")]
    SessionInvalid,

    /// Refresh token whose session is missing, ended or past its expiry
    #[error("session has expired")]
    SessionExpired,

    #[error("session owner has been revoked")]
    OwnerRevoked,

    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed => "TOKEN_MALFORMED",
            TokenError::Expired => "TOKEN_EXPIRED",
            TokenError::SessionInvalid => "SESSION_INVALID",
            TokenError::SessionExpired => "SESSION_EXPIRED",
            TokenError::OwnerRevoked => "SESSION_OWNER_REVOKED",
            TokenError::Unavailable(_) => "SESSION_STORE_UNAVAILABLE",
            TokenError::Signing(_) => "TOKEN_SIGNING_FAILED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TokenError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TokenError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Map a session lookup failure during access validation
    pub(crate) fn from_access_lookup(err: SessionError) -> Self {
        match err {
            SessionError::Durable(e) => TokenError::Unavailable(e.to_string()),
            SessionError::OwnerRevoked(_) => TokenError::OwnerRevoked,
            SessionError::NotFound(_) | SessionError::Ended(_) => TokenError::SessionInvalid,
        }
    }

    /// Map a session lookup failure during refresh
    pub(crate) fn from_refresh_lookup(err: SessionError) -> Self {
        match err {
            SessionError::Durable(e) => TokenError::Unavailable(e.to_string()),
            SessionError::OwnerRevoked(_) => TokenError::OwnerRevoked,
            SessionError::NotFound(_) | SessionError::Ended(_) => TokenError::SessionExpired,
        }
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({
                "code": self.code(),
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StoreError;

    #[test]
    fn test_status_codes() {
        assert_eq!(TokenError::Expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(TokenError::SessionExpired.code(), "SESSION_EXPIRED");
        assert_eq!(
            TokenError::Unavailable("down".to_string()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_outage_fails_closed() {
        let err = SessionError::Durable(StoreError::Unavailable("down".to_string()));
        assert!(matches!(
            TokenError::from_access_lookup(err.clone()),
            TokenError::Unavailable(_)
        ));
        assert!(matches!(
            TokenError::from_refresh_lookup(err),
            TokenError::Unavailable(_)
        ));
        assert_eq!(
            TokenError::from_refresh_lookup(SessionError::Ended("s".to_string())),
            TokenError::SessionExpired
        );
    }
}
