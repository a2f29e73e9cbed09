// Handler error responses

use crate::identity::IdentityError;
use crate::session::SessionError;
use crate::token::TokenError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    Token(TokenError),
    Session(SessionError),
    Identity(IdentityError),
    BadRequest(String),
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        ApiError::Token(err)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        ApiError::Identity(err)
    }
}

fn body(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(json!({
            "code": code,
            "error": message,
        })),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Token(err) => err.into_response(),
            ApiError::Session(err) => match err {
                SessionError::NotFound(_) => {
                    body(StatusCode::UNAUTHORIZED, "SESSION_INVALID", err.to_string())
                }
                SessionError::Ended(_) => {
                    body(StatusCode::UNAUTHORIZED, "SESSION_EXPIRED", err.to_string())
                }
                SessionError::OwnerRevoked(_) => body(
                    StatusCode::UNAUTHORIZED,
                    "SESSION_OWNER_REVOKED",
                    err.to_string(),
                ),
                SessionError::Durable(e) => {
                    error!("Durable session store failure: {}", e);
                    body(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "SESSION_STORE_UNAVAILABLE",
                        "Session store unavailable".to_string(),
                    )
                }
            },
            ApiError::Identity(err) => match err {
                IdentityError::InvalidCredentials | IdentityError::Inactive(_) => body(
                    StatusCode::UNAUTHORIZED,
                    "INVALID_CREDENTIALS",
                    "Invalid credentials".to_string(),
                ),
                IdentityError::Unavailable(e) => {
                    error!("Identity store failure: {}", e);
                    body(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "IDENTITY_UNAVAILABLE",
                        "Identity store unavailable".to_string(),
                    )
                }
            },
            ApiError::BadRequest(message) => {
                body(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
            }
        }
    }
}
